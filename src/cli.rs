use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// Set by the web server for every CGI/1.1 invocation.
pub const GATEWAY_INTERFACE_VAR: &str = "GATEWAY_INTERFACE";

/// Database health probe, run by the web server as a CGI program.
#[derive(Parser, Debug)]
#[command(name = "db-healthcheck", version, about, long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "DB_HEALTHCHECK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Diagnostic output format on stderr
    #[arg(long, value_enum, default_value_t = TracingFormat::default())]
    pub tracing: TracingFormat,

    /// Caller address to record, in place of REMOTE_ADDR
    #[arg(long)]
    pub remote_addr: Option<String>,

    /// Application name to record, in place of the `app` query parameter
    #[arg(long)]
    pub app: Option<String>,
}

impl Args {
    /// Parse `argv`, or only the server-provided environment when running under CGI.
    ///
    /// For a query string without `=`, CGI servers pass its words as arguments.
    /// Those come from the remote caller, so under CGI everything after the
    /// program name is discarded.
    pub fn resolve<I, T>(argv: I, cgi: bool) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut argv = argv.into_iter();
        if cgi {
            return Self::try_parse_from(argv.next());
        }
        Self::try_parse_from(argv)
    }
}

/// Whether this process was started by a web server as a CGI script.
pub fn is_cgi_request() -> bool {
    std::env::var_os(GATEWAY_INTERFACE_VAR).is_some()
}

/// First line of a clap error without its `error: ` prefix.
pub fn describe_error(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable, colorless lines
    Pretty,
    /// One JSON object per event
    Json,
}

impl Default for TracingFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            TracingFormat::Pretty
        } else {
            TracingFormat::Json
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;
    use figment::Jail;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn overrides_parse() {
        Jail::expect_with(|_| {
            let args = Args::resolve(
                [
                    "db-healthcheck",
                    "--config",
                    "/tmp/hc.toml",
                    "--tracing",
                    "json",
                    "--remote-addr",
                    "10.1.2.3",
                    "--app",
                    "nagios",
                ],
                false,
            )
            .unwrap();
            assert_eq!(args.config, PathBuf::from("/tmp/hc.toml"));
            assert_eq!(args.tracing, TracingFormat::Json);
            assert_eq!(args.remote_addr.as_deref(), Some("10.1.2.3"));
            assert_eq!(args.app.as_deref(), Some("nagios"));
            Ok(())
        });
    }

    #[test]
    fn config_path_has_default() {
        Jail::expect_with(|_| {
            let args = Args::resolve(["db-healthcheck"], false).unwrap();
            assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
            assert!(args.remote_addr.is_none());
            Ok(())
        });
    }

    #[test]
    fn cgi_ignores_caller_supplied_words() {
        Jail::expect_with(|_| {
            let args = Args::resolve(["db-healthcheck", "foo"], true).unwrap();
            assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));

            for word in ["--version", "--help"] {
                assert!(Args::resolve(["db-healthcheck", word], true).is_ok(), "{word}");
            }
            Ok(())
        });
    }

    #[test]
    fn cgi_arguments_cannot_override_address_or_config() {
        Jail::expect_with(|_| {
            let args = Args::resolve(
                [
                    "db-healthcheck",
                    "--remote-addr",
                    "10.9.9.9",
                    "--app",
                    "spoofed",
                    "-c",
                    "/some/path",
                ],
                true,
            )
            .unwrap();
            assert_eq!(args.remote_addr, None);
            assert_eq!(args.app, None);
            assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
            Ok(())
        });
    }

    #[test]
    fn cgi_config_path_comes_from_server_environment() {
        Jail::expect_with(|jail| {
            jail.set_env("DB_HEALTHCHECK_CONFIG", "/srv/hc/healthcheck.toml");
            let args = Args::resolve(["db-healthcheck", "-c", "/some/path"], true).unwrap();
            assert_eq!(args.config, PathBuf::from("/srv/hc/healthcheck.toml"));
            Ok(())
        });
    }

    #[test]
    fn shell_errors_are_reported_not_exited() {
        Jail::expect_with(|_| {
            let err = Args::resolve(["db-healthcheck", "foo"], false).unwrap_err();
            assert!(err.use_stderr());
            assert_eq!(describe_error(&err), "unexpected argument 'foo' found");

            let version = Args::resolve(["db-healthcheck", "--version"], false).unwrap_err();
            assert_eq!(version.kind(), ErrorKind::DisplayVersion);
            assert!(!version.use_stderr());
            Ok(())
        });
    }
}
