//! Dependency resolution against the host's install directory.
//!
//! Macros may rely on native libraries that ship with the host rather than
//! with the worker. Those are found next to the host executable, under a
//! configurable sub-directory, using the host pid the worker was started with.

use std::path::{Path, PathBuf};

use libloading::Library;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use thiserror::Error;

/// Qualified-name prefix of the worker's own components.
pub const OWN_NAMESPACE: &str = "mexec-engine";

/// Default sub-directory of the host install that holds dependencies.
pub const DEFAULT_DEPENDENCY_DIR: &str = "PublicAssemblies";

/// Placeholder replaced with the host version in configured names.
const VERSION_PLACEHOLDER: &str = "{version}";

#[derive(Debug, Error)]
pub enum ResolveError {
	/// The host pid does not name a running process.
	#[error("host process {pid} is not running")]
	HostUnavailable {
		/// Host process id.
		pid: u32,
	},
	/// The host is running but its executable path cannot be read.
	#[error("executable path of host process {pid} is unknown")]
	HostExecutableUnknown {
		/// Host process id.
		pid: u32,
	},
	/// The requested name has no usable simple name.
	#[error("invalid dependency name '{0}'")]
	InvalidName(String),
	/// The dependency file exists in the expected place but failed to load.
	#[error("failed to load dependency {path}: {source}")]
	Load {
		/// Library path.
		path: PathBuf,
		#[source]
		source: libloading::Error,
	},
}

/// Finds the executable of a running process.
pub trait HostLocator: Send {
	/// Returns the executable path of process `pid`.
	///
	/// # Errors
	///
	/// Fails when the process is gone or its executable cannot be determined.
	fn host_executable(&self, pid: u32) -> Result<PathBuf, ResolveError>;
}

/// [`HostLocator`] backed by the process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoLocator;

impl HostLocator for SysinfoLocator {
	fn host_executable(&self, pid: u32) -> Result<PathBuf, ResolveError> {
		let sys_pid = Pid::from_u32(pid);
		let mut system = System::new();
		system.refresh_processes_specifics(
			ProcessesToUpdate::Some(&[sys_pid]),
			true,
			ProcessRefreshKind::nothing().with_exe(UpdateKind::Always),
		);

		let process = system.process(sys_pid).ok_or(ResolveError::HostUnavailable { pid })?;
		process
			.exe()
			.map(Path::to_path_buf)
			.ok_or(ResolveError::HostExecutableUnknown { pid })
	}
}

/// A library loaded on behalf of a macro.
///
/// The library stays mapped for as long as this value lives.
#[derive(Debug)]
pub struct LoadedDependency {
	/// Requested qualified name.
	pub name: String,
	/// Resolved file path.
	pub path: PathBuf,
	/// Library handle.
	pub library: Library,
}

/// Strategy for loading dependencies the worker does not ship itself.
pub trait DependencyResolver: Send {
	/// Resolves and loads `qualified_name`.
	///
	/// Returns `Ok(None)` for names the worker provides on its own.
	///
	/// # Errors
	///
	/// Fails when the host is gone or the library cannot be loaded.
	fn resolve(&self, qualified_name: &str) -> Result<Option<LoadedDependency>, ResolveError>;
}

/// Loads dependencies from `<host dir>/<dependency_dir>/`.
#[derive(Debug)]
pub struct HostInstallResolver<L = SysinfoLocator> {
	host_pid: u32,
	dependency_dir: PathBuf,
	locator: L,
}

impl HostInstallResolver {
	pub fn new(host_pid: u32, dependency_dir: impl Into<PathBuf>) -> Self {
		Self::with_locator(host_pid, dependency_dir, SysinfoLocator)
	}
}

impl<L: HostLocator> HostInstallResolver<L> {
	/// Creates a resolver that finds the host through `locator`.
	pub fn with_locator(host_pid: u32, dependency_dir: impl Into<PathBuf>, locator: L) -> Self {
		Self {
			host_pid,
			dependency_dir: dependency_dir.into(),
			locator,
		}
	}

	/// Returns where `qualified_name` is expected on disk.
	///
	/// The host is located again on each call; nothing is cached.
	///
	/// # Errors
	///
	/// Fails for names without a simple name and when the host cannot be
	/// located.
	pub fn dependency_path(&self, qualified_name: &str) -> Result<PathBuf, ResolveError> {
		let name = simple_name(qualified_name).ok_or_else(|| ResolveError::InvalidName(qualified_name.to_string()))?;
		let exe = self.locator.host_executable(self.host_pid)?;
		let host_dir = exe.parent().ok_or(ResolveError::HostExecutableUnknown { pid: self.host_pid })?;
		Ok(host_dir.join(&self.dependency_dir).join(libloading::library_filename(name)))
	}
}

impl<L: HostLocator> DependencyResolver for HostInstallResolver<L> {
	fn resolve(&self, qualified_name: &str) -> Result<Option<LoadedDependency>, ResolveError> {
		if is_own(qualified_name) {
			tracing::trace!(name = qualified_name, "resolve.own");
			return Ok(None);
		}

		let path = self.dependency_path(qualified_name)?;
		tracing::debug!(name = qualified_name, path = %path.display(), "resolve.load");
		// SAFETY: dependencies come from the host's own install directory and
		// are trusted to the same degree as the host itself.
		let library = unsafe { Library::new(&path) }.map_err(|source| ResolveError::Load { path: path.clone(), source })?;

		Ok(Some(LoadedDependency {
			name: qualified_name.to_string(),
			path,
			library,
		}))
	}
}

/// Returns true for names in the worker's own namespace.
pub fn is_own(qualified_name: &str) -> bool {
	qualified_name.trim_start().starts_with(OWN_NAMESPACE)
}

/// Text before the first `,`, trimmed. Names containing path separators are
/// rejected.
pub fn simple_name(qualified_name: &str) -> Option<&str> {
	let name = qualified_name.split(',').next()?.trim();
	if name.is_empty() || name.contains(['/', '\\']) {
		return None;
	}
	Some(name)
}

/// Loads every configured dependency, substituting `{version}`.
///
/// # Errors
///
/// Stops at the first dependency that fails to resolve.
pub fn preload(resolver: &dyn DependencyResolver, names: &[String], host_version: &str) -> Result<Vec<LoadedDependency>, ResolveError> {
	let mut loaded = Vec::with_capacity(names.len());
	for name in names {
		let name = name.replace(VERSION_PLACEHOLDER, host_version);
		if let Some(dependency) = resolver.resolve(&name)? {
			tracing::info!(name = %dependency.name, path = %dependency.path.display(), "resolve.preloaded");
			loaded.push(dependency);
		}
	}
	Ok(loaded)
}
