//! Startup: pick a backend, install the host procedures, load init scripts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::adapter::{Scheme, SchemeError, host_procedure};
use crate::delayed::{DelayedQueue, now_millis};
use crate::glue::install_glue;
use crate::object::{Object, SchemeExt};
use crate::preferences::{Preferences, UserPreferences};
use crate::registry;

pub const PROGS_PATH_VAR: &str = "SCMBRIDGE_PROGS_PATH";
pub const HOME_PATH_VAR: &str = "SCMBRIDGE_HOME_PATH";

const INIT_SCRIPT: &str = "init-bridge.scm";
const USER_INIT_SCRIPT: &str = "my-init-bridge.scm";

/// Where the session looks for its scripts and state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    /// Backend name; `None` uses the registry default
    pub scheme: Option<String>,
    /// Base directory holding `progs-<dialect>/` script directories
    pub progs_path: PathBuf,
    /// Per-user directory for overrides and preferences
    pub home_path: PathBuf,
    /// Load the init scripts
    pub load_init: bool,
}

impl BootConfig {
    /// Resolve paths from flags, then the process environment, then defaults
    pub fn resolve(scheme: Option<String>, progs_path: Option<PathBuf>, home_path: Option<PathBuf>) -> Self {
        Self::resolve_with(scheme, progs_path, home_path, |name| std::env::var_os(name))
    }

    /// [`BootConfig::resolve`] with an explicit environment lookup
    pub fn resolve_with(
        scheme: Option<String>,
        progs_path: Option<PathBuf>,
        home_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<OsString>,
    ) -> Self {
        let progs_path = progs_path
            .or_else(|| env(PROGS_PATH_VAR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("share"));
        let home_path = home_path
            .or_else(|| env(HOME_PATH_VAR).map(PathBuf::from))
            .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".scmbridge")))
            .unwrap_or_else(|| PathBuf::from(".scmbridge"));
        BootConfig {
            scheme,
            progs_path,
            home_path,
            load_init: true,
        }
    }

    /// Platform init script for `dialect`
    pub fn init_script(&self, dialect: &str) -> PathBuf {
        self.progs_path.join(format!("progs-{dialect}")).join(INIT_SCRIPT)
    }

    /// Optional user override script for `dialect`
    pub fn user_init_script(&self, dialect: &str) -> PathBuf {
        self.home_path.join(format!("progs-{dialect}")).join(USER_INIT_SCRIPT)
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.home_path.join("system").join("preferences.scm")
    }
}

/// A booted interpreter with its preferences and delayed-command queue
pub struct Session {
    scheme: Arc<dyn Scheme>,
    config: BootConfig,
    preferences: Arc<Preferences>,
    delayed: Arc<DelayedQueue>,
    startup_message: Arc<Mutex<String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("scheme", &self.scheme.name())
            .field("config", &self.config)
            .field("pending", &self.delayed.len())
            .finish()
    }
}

impl Session {
    /// Select the process-wide backend named by `config` and boot it
    pub fn start(config: BootConfig) -> Result<Self, SchemeError> {
        let scheme = registry::select_scheme(config.scheme.as_deref())?;
        Ok(Self::boot(scheme, config))
    }

    /// Boot an interpreter that was built outside the registry
    pub fn boot(scheme: Arc<dyn Scheme>, config: BootConfig) -> Self {
        info!(scheme = scheme.name(), dialect = scheme.dialect(), "booting session");
        let session = Session {
            preferences: Arc::new(Preferences::new(UserPreferences::load(config.preferences_file()))),
            delayed: Arc::new(DelayedQueue::new()),
            startup_message: Arc::new(Mutex::new(String::new())),
            scheme,
            config,
        };
        install_glue(session.scheme.as_ref());
        session.install_boot_procedures();
        if session.config.load_init {
            session.load_init_scripts();
        }
        session
    }

    pub fn scheme(&self) -> &Arc<dyn Scheme> {
        &self.scheme
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn delayed(&self) -> &DelayedQueue {
        &self.delayed
    }

    /// Last message set with `set-startup-message`
    pub fn startup_message(&self) -> String {
        self.startup_message.lock().clone()
    }

    pub fn eval(&self, text: &str) -> Result<Object, SchemeError> {
        self.scheme.eval(text)
    }

    /// Run the delayed commands that are due
    pub fn drain_delayed(&self) -> usize {
        self.delayed.drain(self.scheme.as_ref())
    }

    pub fn get_preference(&self, key: &str, default: &str) -> String {
        self.preferences.get_preference(self.scheme.as_ref(), key, default)
    }

    pub fn set_preference(&self, key: &str, value: &str) {
        self.preferences.set_preference(self.scheme.as_ref(), key, value);
    }

    /// Persist preferences and drop pending commands
    pub fn shutdown(&self) {
        self.delayed.clear();
        match self.preferences.save() {
            Ok(true) => debug!("preferences saved"),
            Ok(false) => {}
            Err(err) => warn!(%err, "preferences could not be saved"),
        }
    }

    fn load_init_scripts(&self) {
        let dialect = self.scheme.dialect();
        let platform = self.config.init_script(dialect);
        if platform.is_file() {
            self.load_script(&platform);
        } else {
            warn!(path = %platform.display(), "platform init script not found");
        }
        let user = self.config.user_init_script(dialect);
        if user.is_file() {
            self.load_script(&user);
        }
    }

    fn load_script(&self, path: &Path) {
        debug!(path = %path.display(), "loading init script");
        if let Err(err) = SchemeExt::eval_file(self.scheme.as_ref(), path) {
            error!(path = %path.display(), %err, "init script failed");
        }
    }

    fn install_boot_procedures(&self) {
        let scheme = self.scheme.as_ref();

        let login = user_login();
        scheme.install_procedure(
            "get-user-login",
            host_procedure(move |scheme, _| Ok(scheme.string_to_value(&login))),
            0,
            0,
        );
        let name = std::env::var("NAME").unwrap_or_else(|_| user_login());
        scheme.install_procedure(
            "get-user-name",
            host_procedure(move |scheme, _| Ok(scheme.string_to_value(&name))),
            0,
            0,
        );
        scheme.install_procedure(
            "get-working-directory",
            host_procedure(|scheme, _| {
                let cwd = std::env::current_dir()
                    .map_err(|err| SchemeError::evaluation(format!("get-working-directory: {err}")))?;
                Ok(scheme.string_to_value(&cwd.to_string_lossy()))
            }),
            0,
            0,
        );
        let progs = self.config.progs_path.to_string_lossy().into_owned();
        scheme.install_procedure(
            "get-progs-path",
            host_procedure(move |scheme, _| Ok(scheme.string_to_value(&progs))),
            0,
            0,
        );
        let home = self.config.home_path.to_string_lossy().into_owned();
        scheme.install_procedure(
            "get-home-path",
            host_procedure(move |scheme, _| Ok(scheme.string_to_value(&home))),
            0,
            0,
        );

        let message = self.startup_message.clone();
        scheme.install_procedure(
            "set-startup-message",
            host_procedure(move |scheme, args| {
                let text = args.car();
                let text = if text.is_string() { text.to_string_value() } else { text.write() };
                info!(%text, "startup message");
                *message.lock() = text;
                Ok(scheme.unspecified())
            }),
            1,
            0,
        );
        scheme.install_procedure(
            "current-time",
            host_procedure(|scheme, _| Ok(scheme.long_to_value(now_millis()))),
            0,
            0,
        );
        scheme.install_procedure(
            "getpid",
            host_procedure(|scheme, _| Ok(scheme.long_to_value(i64::from(std::process::id())))),
            0,
            0,
        );

        let preferences = self.preferences.clone();
        scheme.install_procedure(
            "notify-preferences-booted",
            host_procedure(move |scheme, _| {
                preferences.notify_preferences_booted();
                Ok(scheme.unspecified())
            }),
            0,
            0,
        );

        let delayed = self.delayed.clone();
        scheme.install_procedure(
            "exec-delayed",
            host_procedure(move |scheme, args| {
                delayed.exec_delayed(procedure_argument(&args, "exec-delayed")?);
                Ok(scheme.unspecified())
            }),
            1,
            0,
        );
        let delayed = self.delayed.clone();
        scheme.install_procedure(
            "exec-delayed-pause",
            host_procedure(move |scheme, args| {
                delayed.exec_delayed_pause(procedure_argument(&args, "exec-delayed-pause")?);
                Ok(scheme.unspecified())
            }),
            1,
            0,
        );
    }
}

fn procedure_argument(args: &crate::Handle, name: &str) -> Result<Object, SchemeError> {
    let command = args.car();
    if command.is_procedure() {
        Ok(Object::new(command))
    } else {
        Err(SchemeError::evaluation(format!("{name}: expected a procedure, got {command}")))
    }
}

fn user_login() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_owned())
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::backends::ArenaScheme;

    fn config_in(dir: &Path) -> BootConfig {
        BootConfig::resolve_with(
            None,
            Some(dir.join("progs")),
            Some(dir.join("home")),
            |_| None,
        )
    }

    #[test]
    fn test_paths_resolve_flags_then_environment_then_defaults() {
        let env = |name: &str| match name {
            PROGS_PATH_VAR => Some(OsString::from("/opt/progs")),
            "HOME" => Some(OsString::from("/home/ada")),
            _ => None,
        };
        let config = BootConfig::resolve_with(None, None, None, env);
        assert_eq!(config.progs_path, PathBuf::from("/opt/progs"));
        assert_eq!(config.home_path, PathBuf::from("/home/ada/.scmbridge"));

        let config = BootConfig::resolve_with(None, Some("flag".into()), Some("me".into()), env);
        assert_eq!(config.progs_path, PathBuf::from("flag"));
        assert_eq!(config.home_path, PathBuf::from("me"));

        let config = BootConfig::resolve_with(None, None, None, |_| None);
        assert_eq!(config.progs_path, PathBuf::from("share"));
        assert_eq!(
            config.init_script("arena"),
            PathBuf::from("share/progs-arena/init-bridge.scm")
        );
    }

    #[test]
    fn test_boot_loads_platform_then_user_script() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let platform = config.init_script("arena");
        let user = config.user_init_script("arena");
        std::fs::create_dir_all(platform.parent().unwrap()).unwrap();
        std::fs::create_dir_all(user.parent().unwrap()).unwrap();
        std::fs::write(&platform, "(define order '(platform)) (set-startup-message \"ready\")").unwrap();
        std::fs::write(&user, "(set! order (cons 'user order))").unwrap();

        let session = Session::boot(Arc::new(ArenaScheme::new()), config);
        assert_eq!(session.eval("order").unwrap().to_string(), "(user platform)");
        assert_eq!(session.startup_message(), "ready");
    }

    #[test]
    fn test_missing_scripts_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::boot(Arc::new(ArenaScheme::new()), config_in(dir.path()));
        assert_eq!(session.eval("(+ 1 2)").unwrap().as_int(), 3);
        assert!(session.eval("(tree? 1)").is_ok());
    }

    #[test]
    fn test_delayed_commands_from_interpreter_code() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::boot(Arc::new(ArenaScheme::new()), config_in(dir.path()));
        session
            .eval("(define ticks 0) (exec-delayed (lambda () (set! ticks (+ ticks 1)) 10))")
            .unwrap();
        assert_eq!(session.delayed().len(), 1);
        assert_eq!(session.drain_delayed(), 1);
        assert!(session.delayed().is_empty());
        assert_eq!(session.eval("ticks").unwrap().as_int(), 1);
        assert!(session.eval("(exec-delayed 5)").is_err());
    }

    #[test]
    fn test_preferences_follow_the_interpreter_after_boot() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::boot(Arc::new(ArenaScheme::new()), config_in(dir.path()));
        session.set_preference("zoom", "1.5");
        assert_eq!(session.get_preference("zoom", "1"), "1.5");

        session.eval("(notify-preferences-booted)").unwrap();
        assert_eq!(session.get_preference("zoom", "1"), "1");
        session.set_preference("zoom", "2");
        assert_eq!(session.eval("(get-preference \"zoom\")").unwrap().as_string(), "2");

        session.shutdown();
        let saved = std::fs::read_to_string(session.config().preferences_file()).unwrap();
        assert_eq!(saved, "(\"zoom\" \"1.5\")\n");
    }
}
