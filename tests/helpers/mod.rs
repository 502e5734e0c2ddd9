pub mod echo_server;
pub mod flaky_gate;
