//! Client process entry point for end-to-end runs

use clap::Parser;

use harness::client::{run_client, ClientArgs};
use shared::{logging, ProcessId};

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();

    ProcessId::init_client();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(
        ProcessId::current(),
        &format!(
            "echo client ({} scenario, control port {}, server port {})",
            args.scenario.as_arg(),
            args.client_control_port,
            args.server_port
        ),
    );

    let code = match run_client(args).await {
        Ok(code) => {
            logging::log_shutdown(ProcessId::current(), &format!("exit code {code}"));
            code
        }
        Err(e) => {
            logging::log_error(ProcessId::current(), "Client run", &e);
            2
        }
    };

    std::process::exit(code);
}
