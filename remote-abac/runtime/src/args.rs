use crate::{
    authorize::Authorize,
    policy::AbacPolicyEngine,
    reload::{Reloader, WATCH_RETRY_BACKOFF},
    source::{Fetcher, ScratchFile, DEFAULT_SCRATCH_FILE},
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use remote_abac_core::PolicyLocation;
use remote_abac_etcd as etcd;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::signal::unix::{signal, SignalKind};
use tokio_stream::wrappers::SignalStream;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "remote-abac", about = "An ABAC authorization webhook")]
pub struct Args {
    #[clap(long, default_value = "remote_abac=info,warn", env = "REMOTE_ABAC_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// The address on which authorization requests are served.
    ///
    /// A bare `:port` listens on all interfaces.
    #[clap(
        long,
        default_value = "0.0.0.0:8444",
        env = "REMOTE_ABAC_ADDRESS",
        value_parser = parse_listen_addr
    )]
    address: SocketAddr,

    /// Where the policy is stored: a file path, or `etcd@http://host:port/key,...`.
    #[clap(long, env = "REMOTE_ABAC_POLICY")]
    authorization_policy_file: String,

    #[clap(long, env = "REMOTE_ABAC_TLS_CERT")]
    tls_cert_file: kubert::server::TlsCertPath,

    #[clap(long, env = "REMOTE_ABAC_TLS_KEY")]
    tls_private_key_file: kubert::server::TlsKeyPath,

    /// Where policies read from etcd are written before they are compiled.
    #[clap(long, default_value = DEFAULT_SCRATCH_FILE, env = "REMOTE_ABAC_SCRATCH_FILE")]
    policy_scratch_file: PathBuf,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            address,
            authorization_policy_file,
            tls_cert_file,
            tls_private_key_file,
            policy_scratch_file,
        } = self;

        log_format
            .try_init(log_level)
            .expect("must configure logging");

        let (shutdown, drain) = kubert::shutdown::sigint_or_sigterm()?;

        // Reload requests are queued from here on; one that arrives during the initial load is
        // handled once the reloader starts.
        let usr1 = reload_signals()?;

        // The process can't serve without an initial policy.
        let fetcher = Fetcher::new(ScratchFile::new(policy_scratch_file));
        let (reloader, snapshot) =
            Reloader::load(authorization_policy_file, fetcher, AbacPolicyEngine::new()).await?;
        let reloader = Arc::new(reloader);

        tokio::spawn({
            let reloader = reloader.clone();
            let drain = drain.clone();
            async move {
                reloader
                    .on_signal(usr1, drain.signaled().map(|_| ()))
                    .await
            }
            .instrument(info_span!("sigusr1"))
        });

        if let PolicyLocation::Etcd { endpoints, key } = reloader.location() {
            let watch = etcd::Client::new(endpoints.iter().cloned())?.watch(key, snapshot.index);
            let reloader = reloader.clone();
            let drain = drain.clone();
            tokio::spawn(
                async move {
                    reloader
                        .on_change(watch, WATCH_RETRY_BACKOFF, drain.signaled().map(|_| ()))
                        .await
                }
                .instrument(info_span!("watch", %key)),
            );
        }

        let server = kubert::ServerArgs {
            server_addr: address,
            server_tls_key: Some(tls_private_key_file),
            server_tls_certs: Some(tls_cert_file),
        };
        let server = server.bind().await?;
        info!(%address, "Serving authorization requests");
        server.spawn(Authorize::new(reloader.authorizer().clone()), drain);

        // Block the main thread on the shutdown signal.
        if shutdown.signaled().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Registers for `SIGUSR1`, replacing the signal's default action of terminating the process.
fn reload_signals() -> std::io::Result<SignalStream> {
    signal(SignalKind::user_defined1()).map(SignalStream::new)
}

/// Parses a listen address, treating a bare `:port` as all interfaces.
fn parse_listen_addr(s: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    match s.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => s.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addrs() {
        assert_eq!(
            parse_listen_addr(":8444").unwrap(),
            "0.0.0.0:8444".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_listen_addr("[::1]:443").unwrap(),
            "[::1]:443".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_listen_addr(":").is_err());
        assert!(parse_listen_addr("localhost").is_err());
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "remote-abac",
            "--authorization-policy-file=etcd@http://127.0.0.1:2379/abac",
            "--tls-cert-file=/var/run/tls/tls.crt",
            "--tls-private-key-file=/var/run/tls/tls.key",
            "--address=:9443",
        ])
        .expect("flags must parse");
        assert_eq!(args.address, "0.0.0.0:9443".parse::<SocketAddr>().unwrap());
        assert_eq!(
            args.authorization_policy_file,
            "etcd@http://127.0.0.1:2379/abac"
        );
        assert_eq!(args.policy_scratch_file, PathBuf::from(DEFAULT_SCRATCH_FILE));
    }

    #[tokio::test]
    async fn reload_signals_are_queued_until_read() {
        let mut signals = reload_signals().expect("must register for SIGUSR1");

        // Delivered before anything reads the stream, as during the initial load.
        let status = std::process::Command::new("kill")
            .args(["-USR1", &std::process::id().to_string()])
            .status()
            .expect("must run kill");
        assert!(status.success());
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        tokio::time::timeout(std::time::Duration::from_secs(5), signals.next())
            .await
            .expect("queued signal must be delivered")
            .expect("signal stream must not end");
    }

    #[test]
    fn requires_tls() {
        assert!(Args::try_parse_from([
            "remote-abac",
            "--authorization-policy-file=/etc/abac/policy.jsonl",
        ])
        .is_err());
    }
}
