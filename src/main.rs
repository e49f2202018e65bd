use db_healthcheck::cli::{self, Args, TracingFormat};
use db_healthcheck::config::{Config, DEFAULT_LOG_LEVEL, ResponseMode};
use db_healthcheck::error::ProbeError;
use db_healthcheck::logging::setup_logging;
use db_healthcheck::request::RequestContext;
use db_healthcheck::response::Responder;
use db_healthcheck::session::{Backends, ProcessGuard, Session};
use std::io::stdout;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let guard = ProcessGuard::install();
    guard.run(stdout(), probe(&guard)).await;

    // The verdict travels in the HTTP status; the process itself always succeeds
    ExitCode::SUCCESS
}

async fn probe(guard: &ProcessGuard) {
    dotenvy::dotenv().ok();

    let cgi = cli::is_cgi_request();
    let args = match Args::resolve(std::env::args_os(), cgi) {
        Ok(args) => args,
        // --help and --version from a shell
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return;
        }
        Err(e) => {
            setup_logging(DEFAULT_LOG_LEVEL, TracingFormat::default());
            let message = ProbeError::Arguments(cli::describe_error(&e)).to_string();
            error!(reason = %message, "failed to parse command line");
            guard.fail(stdout(), ResponseMode::default(), &message);
            return;
        }
    };

    // Load config before logging so the configured level applies to startup logs
    let config = Config::load(&args.config);
    let log_level = config
        .as_ref()
        .map_or(DEFAULT_LOG_LEVEL, |c| c.log_level.as_str());
    setup_logging(log_level, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        config = %args.config.display(),
        cgi,
        "starting db-healthcheck"
    );

    let config = match config {
        Ok(config) => Arc::new(config),
        Err(e) => {
            // No syslog without a configuration; the caller still gets its 500
            error!(error = format!("{e:#}"), "failed to load configuration");
            let message = ProbeError::Config(format!("{e:#}")).to_string();
            guard.fail(stdout(), ResponseMode::default(), &message);
            return;
        }
    };

    let request = RequestContext::from_cgi_env().with_overrides(args.remote_addr, args.app);
    let responder = Responder::new(stdout(), config.response_mode);

    let mut session = Session::with_gate(config, request, Backends::system(), responder, guard.gate());
    session.run().await;
}
