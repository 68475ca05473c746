//! Native Nu commands exposed to macros.

use nu_protocol::engine::{Call, Command, EngineState, Stack};
use nu_protocol::{Category, PipelineData, ShellError, Signature, Type, Value, record};

use crate::HostContext;

/// `host info`: returns `{ pid: int, version: string }` for the host process.
#[derive(Clone)]
pub struct HostInfoCommand {
	host: HostContext,
}

impl HostInfoCommand {
	/// Creates the command for the given host.
	pub fn new(host: HostContext) -> Self {
		Self { host }
	}
}

impl Command for HostInfoCommand {
	fn name(&self) -> &str {
		"host info"
	}

	fn signature(&self) -> Signature {
		Signature::build("host info")
			.input_output_types(vec![(Type::Nothing, Type::Any)])
			.category(Category::Custom("mexec".into()))
	}

	fn description(&self) -> &str {
		"Describe the host process that launched this worker"
	}

	fn run(&self, _engine_state: &EngineState, _stack: &mut Stack, call: &Call, _input: PipelineData) -> Result<PipelineData, ShellError> {
		let span = call.head;
		let info = record! {
			"pid" => Value::int(i64::from(self.host.pid), span),
			"version" => Value::string(self.host.version.clone(), span),
		};
		Ok(PipelineData::Value(Value::record(info, span), None))
	}
}
