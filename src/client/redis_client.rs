//! Per-member Redis admin client built on the fred crate.
//!
//! The operator connects to one member at a time (never through cluster
//! discovery): topology decisions are made against a specific pod, so the
//! client is always centralized even when the member is in cluster mode.

use std::time::Duration;

use fred::prelude::*;
use fred::types::InfoKind;
use fred::types::cluster::ClusterResetFlag;
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors that can occur during member commands.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Protocol(#[from] fred::error::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] crate::client::types::ParseError),
}

/// TLS material loaded from a Kubernetes secret.
#[derive(Clone)]
pub struct TlsCertData {
    /// CA certificate in PEM format.
    pub ca_cert_pem: Vec<u8>,
    /// Client certificate in PEM format (optional, for mTLS).
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client key in PEM format (optional, for mTLS).
    pub client_key_pem: Option<Vec<u8>>,
}

/// Admin client for a single Redis member.
pub struct RedisClient {
    client: Client,
}

impl RedisClient {
    /// Connect to a single member.
    #[instrument(skip_all, fields(host = %host, port = %port, tls = tls_certs.is_some()))]
    pub async fn connect(
        host: &str,
        port: u16,
        password: Option<&str>,
        tls_certs: Option<&TlsCertData>,
    ) -> Result<Self, RedisError> {
        let server_config = ServerConfig::Centralized {
            server: Server::new(host, port),
        };

        let mut config = Config {
            server: server_config,
            ..Default::default()
        };

        if let Some(pass) = password {
            config.password = Some(pass.to_string());
        }

        if let Some(certs) = tls_certs {
            let tls_connector = build_tls_connector(certs)?;
            config.tls = Some(tls_connector.into());
        }

        let client = Builder::from_config(config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = Duration::from_secs(30);
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = Duration::from_secs(10);
            })
            .build()?;

        client.init().await?;
        debug!("Connected to member");

        Ok(Self { client })
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<(), RedisError> {
        self.client.quit().await?;
        Ok(())
    }

    /// PING the member.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<String, RedisError> {
        let response: String = self.client.ping(None).await?;
        Ok(response)
    }

    /// INFO for a single section ("replication", "cluster", ...).
    #[instrument(skip(self))]
    pub async fn info(&self, section: Option<InfoKind>) -> Result<String, RedisError> {
        let response: String = self.client.info(section).await?;
        Ok(response)
    }

    /// Raw CLUSTER NODES output.
    #[instrument(skip(self))]
    pub async fn cluster_nodes(&self) -> Result<String, RedisError> {
        let response: String = self.client.cluster_nodes().await?;
        Ok(response)
    }

    /// CLUSTER MYID of this member.
    #[instrument(skip(self))]
    pub async fn cluster_myid(&self) -> Result<String, RedisError> {
        let id: String = self.client.cluster_myid().await?;
        Ok(id)
    }

    /// CLUSTER MEET to (re-)introduce a node to the cluster.
    #[instrument(skip(self))]
    pub async fn cluster_meet(&self, ip: &str, port: u16) -> Result<(), RedisError> {
        self.client.cluster_meet(ip, port).await?;
        Ok(())
    }

    /// CLUSTER REPLICATE to attach this member to a master.
    #[instrument(skip(self))]
    pub async fn cluster_replicate(&self, master_node_id: &str) -> Result<(), RedisError> {
        self.client.cluster_replicate(master_node_id).await?;
        Ok(())
    }

    /// CLUSTER RESET. Hard reset wipes the node ID as well.
    #[instrument(skip(self))]
    pub async fn cluster_reset(&self, hard: bool) -> Result<(), RedisError> {
        let mode = if hard {
            Some(ClusterResetFlag::Hard)
        } else {
            Some(ClusterResetFlag::Soft)
        };
        self.client.cluster_reset(mode).await?;
        Ok(())
    }

    /// FLUSHALL. Needed before CLUSTER RESET on nodes still holding keys.
    #[instrument(skip(self))]
    pub async fn flushall(&self) -> Result<(), RedisError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// SLAVEOF host port, making this member a replica.
    #[instrument(skip(self))]
    pub async fn slave_of(&self, host: &str, port: u16) -> Result<(), RedisError> {
        let _: () = self
            .client
            .custom(
                fred::cmd!("SLAVEOF"),
                vec![host.to_string(), port.to_string()],
            )
            .await?;
        Ok(())
    }

    /// SLAVEOF NO ONE, detaching this member from its master.
    #[instrument(skip(self))]
    pub async fn slave_of_no_one(&self) -> Result<(), RedisError> {
        let _: () = self
            .client
            .custom(
                fred::cmd!("SLAVEOF"),
                vec!["NO".to_string(), "ONE".to_string()],
            )
            .await?;
        Ok(())
    }

    /// CLIENT KILL TYPE normal, forcing regular clients to reconnect and
    /// re-discover the topology after a promotion.
    #[instrument(skip(self))]
    pub async fn client_kill_normal(&self) -> Result<(), RedisError> {
        let _: () = self
            .client
            .custom(
                fred::cmd!("CLIENT"),
                vec!["KILL".to_string(), "TYPE".to_string(), "normal".to_string()],
            )
            .await?;
        Ok(())
    }

    /// CONFIG SET a single dynamic parameter.
    #[instrument(skip(self))]
    pub async fn config_set(&self, parameter: &str, value: &str) -> Result<(), RedisError> {
        let _: () = self.client.config_set(parameter, value).await?;
        Ok(())
    }
}

/// Build a TLS connector from certificate data.
///
/// The operator connects to members by pod IP while certificates are issued
/// for the pod DNS names, so the verifier validates the chain and signatures
/// but not the hostname.
fn build_tls_connector(certs: &TlsCertData) -> Result<TlsConnector, RedisError> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
    use std::sync::Arc;

    let mut root_store = RootCertStore::empty();
    let ca_certs = rustls_pemfile::certs(&mut certs.ca_cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RedisError::Connection(format!("Failed to parse CA certificate: {}", e)))?;

    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|e| RedisError::Connection(format!("Failed to add CA certificate: {}", e)))?;
    }

    #[derive(Debug)]
    struct PodIpVerifier;

    impl ServerCertVerifier for PodIpVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            // Connections go to pod IPs; certificates name the pod DNS
            // entries. Signatures are still verified below.
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }

    let verifier = Arc::new(PodIpVerifier);
    let _ = root_store;

    let config = if let (Some(cert_pem), Some(key_pem)) =
        (&certs.client_cert_pem, &certs.client_key_pem)
    {
        let client_certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|e| {
                RedisError::Connection(format!("Failed to parse client certificate: {}", e))
            })?;

        let client_key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|e| RedisError::Connection(format!("Failed to parse client key: {}", e)))?
            .ok_or_else(|| RedisError::Connection("No private key found in PEM".to_string()))?;

        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|e| RedisError::Connection(format!("Failed to build TLS config: {}", e)))?
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth()
    };

    Ok(TlsConnector::from(config))
}
