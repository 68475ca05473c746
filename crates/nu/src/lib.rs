//! Nu engine facade for mexec.
//!
//! Keeps a base Nu [`EngineState`] and parses each macro into a fresh copy of
//! it, then invokes a named entry point in that copy. Each invocation yields an [`Outcome`]
//! that already separates script runtime errors from host faults, so callers
//! never have to inspect engine state after a failed call.
//!
//! The engine context holds the `nu-cmd-lang` language commands (definitions,
//! bindings, control flow, loops, errors), a small prelude module and the
//! `host info` command. Filesystem, network and external commands are not
//! registered.
//!
//! Primary sources:
//! * Nu default language context (`nu-cmd-lang`):
//!   <https://github.com/nushell/nushell/blob/main/crates/nu-cmd-lang/src/default_context.rs>
//! * Nu evaluation of declarations (`nu-engine`):
//!   <https://github.com/nushell/nushell/blob/main/crates/nu-engine/src/eval.rs>

mod commands;
mod location;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

pub use commands::HostInfoCommand;
use location::ScriptSource;
use mexec_proto::{HostFaultReport, ScriptErrorReport};
use miette::Diagnostic;
use nu_protocol::ast::Call;
use nu_protocol::debugger::WithoutDebug;
use nu_protocol::engine::{EngineState, Stack, StateWorkingSet};
use nu_protocol::{Config, DeclId, PipelineData, ShellError, Span, Value};
use thiserror::Error;

/// Name reported as the originating component of engine faults.
pub const ORIGIN: &str = "mexec-nu";

/// Virtual file name given to parsed macros.
const SCRIPT_FILE_NAME: &str = "<macro>";

const DEFAULT_RECURSION_LIMIT: i64 = 64;

const MEXEC_PRELUDE_SOURCE: &str = r#"
module mexec {
    export def default [value] { if $in == null { $value } else { $in } }
    export def is-null [] { $in == null }
}
use mexec *
"#;

/// Identity of the host process, exposed to scripts through `host info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
	/// Host process id.
	pub pid: u32,
	/// Opaque host version string.
	pub version: String,
}

/// Engine construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
	/// Maximum custom command recursion depth.
	pub recursion_limit: i64,
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self {
			recursion_limit: DEFAULT_RECURSION_LIMIT,
		}
	}
}

/// Result of one entry point invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	/// The call returned normally.
	Success,
	/// The script raised an error inside its own source.
	///
	/// Line and column are relative to the parsed source, wrapper included.
	ScriptFault(ScriptErrorReport),
	/// The failure is not attributable to the script source.
	HostFault(HostFaultReport),
}

/// Errors raised while building the engine or parsing a script.
#[derive(Debug, Error)]
pub enum EngineError {
	/// The source did not parse.
	#[error("Nu parse error: {0}")]
	Parse(String),
	/// The source parsed but did not compile.
	#[error("Nu compile error: {0}")]
	Compile(String),
	/// The parsed delta could not be merged into the engine state.
	#[error("Nu merge error: {0}")]
	Merge(#[source] ShellError),
}

/// A Nu engine that parses macros and invokes their entry point.
pub struct NuEngine {
	/// Language context and prelude; never holds macro declarations.
	base: EngineState,
	engine_state: EngineState,
	script: Option<ScriptSource>,
	last_error: Option<ShellError>,
}

impl fmt::Debug for NuEngine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NuEngine")
			.field("has_script", &self.script.is_some())
			.field("last_error", &self.last_error)
			.finish_non_exhaustive()
	}
}

impl NuEngine {
	/// Builds an engine with the language context, prelude and `host info`.
	///
	/// # Errors
	///
	/// Returns an error if the prelude fails to parse or merge.
	pub fn new(host: HostContext, options: &EngineOptions) -> Result<Self, EngineError> {
		let mut engine_state = create_lang_context(host)?;
		let mut config: Config = engine_state.get_config().as_ref().clone();
		config.recursion_limit = options.recursion_limit;
		engine_state.set_config(config);

		load_prelude(&mut engine_state)?;

		Ok(Self {
			base: engine_state.clone(),
			engine_state,
			script: None,
			last_error: None,
		})
	}

	/// Parses `source` into a fresh copy of the base engine state.
	///
	/// Declarations from earlier calls are dropped, so the only macro code
	/// reachable from the entry point is `source` itself. The current
	/// declarations are kept if `source` fails to parse.
	///
	/// # Errors
	///
	/// Returns the first parse or compile error, or a merge failure.
	pub fn parse(&mut self, source: &str) -> Result<(), EngineError> {
		let mut engine_state = self.base.clone();
		let mut working_set = StateWorkingSet::new(&engine_state);
		let span_start = working_set.next_span_start();
		let _block = nu_parser::parse(&mut working_set, Some(SCRIPT_FILE_NAME), source.as_bytes(), false);

		if let Some(error) = working_set.parse_errors.first() {
			return Err(EngineError::Parse(error.to_string()));
		}
		if let Some(error) = working_set.compile_errors.first() {
			return Err(EngineError::Compile(error.to_string()));
		}

		let delta = working_set.render();
		engine_state.merge_delta(delta).map_err(EngineError::Merge)?;
		self.engine_state = engine_state;
		self.script = Some(ScriptSource::new(span_start, source));
		tracing::debug!(bytes = source.len(), span_start, "nu.parse");
		Ok(())
	}

	/// Invokes the declaration `name` with no arguments on a fresh stack.
	///
	/// Panics raised by the engine are caught and reported as host faults.
	pub fn invoke(&mut self, name: &str) -> Outcome {
		let Some(decl_id) = find_decl(&self.engine_state, name) else {
			return Outcome::HostFault(HostFaultReport {
				message: format!("entry point '{name}' is not defined"),
				source: ORIGIN.to_string(),
				stack_trace: String::new(),
				target_site: name.to_string(),
			});
		};

		let engine_state = &self.engine_state;
		let result = panic::catch_unwind(AssertUnwindSafe(|| eval_decl(engine_state, decl_id)));

		match result {
			Ok(Ok(Value::Error { error, .. })) => self.classify(*error, name),
			Ok(Ok(_)) => Outcome::Success,
			Ok(Err(error)) => self.classify(error, name),
			Err(payload) => Outcome::HostFault(HostFaultReport::from_panic(payload.as_ref(), ORIGIN, name)),
		}
	}

	/// Returns the error recorded by the last failed invocation.
	///
	/// Inspection API: the outcome returned by [`NuEngine::invoke`] already
	/// carries everything a caller needs, this keeps the raw [`ShellError`]
	/// around for diagnostics until [`NuEngine::reset_error`].
	pub fn last_error(&self) -> Option<&ShellError> {
		self.last_error.as_ref()
	}

	/// Clears the recorded error.
	pub fn reset_error(&mut self) {
		self.last_error = None;
	}

	fn classify(&mut self, error: ShellError, entry_point: &str) -> Outcome {
		let location = self
			.script
			.as_ref()
			.and_then(|script| primary_offset(&error, &|offset| script.contains(offset)).map(|offset| script.position(offset)));

		let outcome = match location {
			Some((line, column)) => Outcome::ScriptFault(ScriptErrorReport {
				line,
				column,
				source: diagnostic_code(&error),
				description: error.to_string(),
			}),
			None => Outcome::HostFault(HostFaultReport {
				message: error.to_string(),
				source: diagnostic_code(&error),
				stack_trace: format!("{error:?}"),
				target_site: entry_point.to_string(),
			}),
		};

		tracing::debug!(entry_point, kind = outcome_kind(&outcome), "nu.invoke.failed");
		self.last_error = Some(error);
		outcome
	}
}

fn outcome_kind(outcome: &Outcome) -> &'static str {
	match outcome {
		Outcome::Success => "success",
		Outcome::ScriptFault(_) => "script_fault",
		Outcome::HostFault(_) => "host_fault",
	}
}

fn eval_decl(engine_state: &EngineState, decl_id: DeclId) -> Result<Value, ShellError> {
	let span = Span::unknown();
	let mut call = Call::new(span);
	call.decl_id = decl_id;

	let mut stack = Stack::new();
	let data = nu_engine::eval_call::<WithoutDebug>(engine_state, &mut stack, &call, PipelineData::empty())?;
	data.into_value(span)
}

/// Finds the label offset that best locates `diag` inside the script.
///
/// Nested diagnostics (chained custom command errors) are searched first so
/// the innermost location wins over the call site.
fn primary_offset(diag: &dyn Diagnostic, in_script: &dyn Fn(usize) -> bool) -> Option<usize> {
	let inner = diag
		.related()
		.into_iter()
		.flatten()
		.find_map(|related| primary_offset(related, in_script))
		.or_else(|| diag.diagnostic_source().and_then(|source| primary_offset(source, in_script)));

	inner.or_else(|| diag.labels()?.map(|label| label.offset()).find(|offset| in_script(*offset)))
}

fn diagnostic_code(error: &ShellError) -> String {
	Diagnostic::code(error).map_or_else(|| "nu::shell".to_string(), |code| code.to_string())
}

/// Builds an engine state holding only language commands and `host info`.
fn create_lang_context(host: HostContext) -> Result<EngineState, EngineError> {
	let mut engine_state = EngineState::new();
	let delta = {
		let mut working_set = StateWorkingSet::new(&engine_state);
		macro_rules! bind {
			( $( $cmd:expr ),* $(,)? ) => {
				$( working_set.add_decl(Box::new($cmd)); )*
			};
		}
		bind! {
			// Definitions and modules
			nu_cmd_lang::Def,
			nu_cmd_lang::ExportDef,
			nu_cmd_lang::Module,
			nu_cmd_lang::ExportModule,
			nu_cmd_lang::Use,
			nu_cmd_lang::ExportUse,
			nu_cmd_lang::Alias,
			nu_cmd_lang::ExportAlias,
			// Bindings
			nu_cmd_lang::Let,
			nu_cmd_lang::Mut,
			nu_cmd_lang::Const,
			nu_cmd_lang::ExportConst,
			// Control flow
			nu_cmd_lang::If,
			nu_cmd_lang::Match,
			nu_cmd_lang::Do,
			nu_cmd_lang::Try,
			nu_cmd_lang::Return,
			nu_cmd_lang::For,
			nu_cmd_lang::While,
			nu_cmd_lang::Loop,
			nu_cmd_lang::Break,
			nu_cmd_lang::Continue,
			// Output and error handling
			nu_cmd_lang::Echo,
			nu_cmd_lang::Error,
			nu_cmd_lang::ErrorMake,
			// Host
			HostInfoCommand::new(host),
		}
		working_set.render()
	};
	engine_state.merge_delta(delta).map_err(EngineError::Merge)?;
	Ok(engine_state)
}

fn load_prelude(engine_state: &mut EngineState) -> Result<(), EngineError> {
	let mut working_set = StateWorkingSet::new(engine_state);
	let _block = nu_parser::parse(&mut working_set, Some("<mexec/prelude>"), MEXEC_PRELUDE_SOURCE.as_bytes(), false);

	if let Some(error) = working_set.parse_errors.first() {
		return Err(EngineError::Parse(format!("prelude: {error}")));
	}
	if let Some(error) = working_set.compile_errors.first() {
		return Err(EngineError::Compile(format!("prelude: {error}")));
	}

	let delta = working_set.render();
	engine_state.merge_delta(delta).map_err(EngineError::Merge)
}

/// Looks up a declaration by name in the engine state.
fn find_decl(engine_state: &EngineState, name: &str) -> Option<DeclId> {
	engine_state.find_decl(name.as_bytes(), &[])
}
