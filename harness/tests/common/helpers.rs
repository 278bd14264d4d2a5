//! Test helpers shared by the end-to-end suites

use std::sync::Once;

use harness::{ClientEntryPoint, ClientWaiterStub, HarnessResult, RetryPolicy, TestContext, TestOrchestrator};
use shared::{logging, ProcessId};

static INIT: Once = Once::new();

pub struct TestHelpers;

#[allow(dead_code)] // Not every suite uses every helper
impl TestHelpers {
    /// Set up process id and logging once per test binary
    pub fn init() {
        INIT.call_once(|| {
            ProcessId::init_harness();
            logging::init_tracing_with_level(Some("warn"));
        });
    }

    /// Test body that does one echo round trip against the server
    pub async fn echo_body(context: TestContext) -> HarnessResult<()> {
        let reply = context.echo_stub().echo("from the test body").await?;
        assert_eq!(reply, "from the test body");
        Ok(())
    }

    /// Walk `orchestrator` to the test body with a client that cannot report
    /// in by itself, sending its start notification from the test
    pub async fn ready_by_hand(orchestrator: &mut TestOrchestrator, entry: &ClientEntryPoint) -> TestContext {
        let server_port = orchestrator.start_server().await.unwrap();
        orchestrator.launch_client(entry).unwrap();

        ClientWaiterStub::new(server_port, RetryPolicy::default())
            .client_started()
            .await
            .unwrap();

        orchestrator.await_client_ready().await.unwrap();
        orchestrator.enter_test_body().unwrap()
    }

    /// True if nothing accepts connections on the loopback `port`
    pub async fn port_is_closed(port: u16) -> bool {
        tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err()
    }

    /// True if `pid` no longer names a process, zombie or otherwise
    #[cfg(unix)]
    pub fn process_is_gone(pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::unistd::Pid;

        nix::sys::signal::kill(Pid::from_raw(pid as i32), None) == Err(Errno::ESRCH)
    }
}
