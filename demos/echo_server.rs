use framed_rpc::processor::EchoProcessor;
use framed_rpc::{Server, ServerConfig};

fn main() -> framed_rpc::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig {
        bind_addr: "127.0.0.1:9000".parse().unwrap(),
        ..ServerConfig::default()
    };
    let server = Server::new(config, EchoProcessor);

    server.serve()
}
