use std::net::ToSocketAddrs;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use nssldapd::server::{Server, ServerConfig};
use nssldapd::Config;

fn main() -> ExitCode {
    env_logger::init();
    let config = Config::parse();

    let bind = match config.bind.to_socket_addrs().ok().and_then(|mut addrs| addrs.next()) {
        Some(addr) => addr,
        None => {
            error!("invalid --bind address: {}", config.bind);
            return ExitCode::FAILURE;
        }
    };

    let tls = match (config.tls_cert, config.tls_key) {
        (Some(cert), Some(key)) => Some((cert, key, config.tls_ca)),
        _ => None,
    };

    let server_config = ServerConfig {
        bind,
        basedn: config.basedn,
        root_user: config.root_user,
        anon_ok: config.allow_anonymous,
        uid_ranges: config.uid_ranges,
        gid_ranges: config.gid_ranges,
        tls,
        pam_service: config.pam_service,
    };

    let mut server = match Server::init(server_config) {
        Ok(server) => server,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.start() {
        error!("event loop failed: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
