//! Self-signed TLS bootstrap for the eviction webhook
//!
//! On startup the controller loads its certificate material from a
//! Secret, or mints a fresh CA plus server certificate, stores them,
//! and stamps the CA into the webhook configuration so the API server
//! trusts the endpoint.

use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams, PostParams};
use kube::Api;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::CertificateDer;
use std::collections::BTreeMap;
use std::io::BufReader;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Secret the certificate material lives in between restarts.
pub const DEFAULT_TLS_SECRET_NAME: &str = "zoneguard-webhook-tls";

/// MutatingWebhookConfiguration carrying the eviction webhook.
pub const WEBHOOK_CONFIG_NAME: &str = "zoneguard-eviction-webhook";

const CA_VALIDITY_DAYS: i64 = 3650;
const CERT_VALIDITY_DAYS: i64 = 365;

const KEY_CA_CERT: &str = "ca.crt";
const KEY_TLS_CERT: &str = "tls.crt";
const KEY_TLS_KEY: &str = "tls.key";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),

    #[error("certificate material unusable: {0}")]
    BadMaterial(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// PEM material for the webhook listener.
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
}

impl TlsMaterial {
    /// DER bytes of the CA for the webhook `caBundle` field (the field
    /// base64-encodes on serialization).
    pub fn ca_der(&self) -> Result<Vec<u8>, TlsError> {
        let block =
            pem::parse(&self.ca_pem).map_err(|e| TlsError::BadMaterial(format!("CA PEM: {e}")))?;
        Ok(block.contents().to_vec())
    }
}

fn validity(days: i64) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now, now + time::Duration::days(days))
}

fn mint_ca() -> Result<(Certificate, KeyPair), TlsError> {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, "zoneguard-webhook-ca");
    params
        .distinguished_name
        .push(DnType::OrganizationName, "zoneguard");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    (params.not_before, params.not_after) = validity(CA_VALIDITY_DAYS);

    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    Ok((cert, key))
}

fn mint_server_cert(
    ca: &Certificate,
    ca_key: &KeyPair,
    service: &str,
    namespace: &str,
) -> Result<(String, String), TlsError> {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, service);
    params
        .distinguished_name
        .push(DnType::OrganizationName, "zoneguard");
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    (params.not_before, params.not_after) = validity(CERT_VALIDITY_DAYS);

    // The API server may dial the service under any of its DNS forms.
    for name in [
        service.to_string(),
        format!("{service}.{namespace}"),
        format!("{service}.{namespace}.svc"),
        format!("{service}.{namespace}.svc.cluster.local"),
    ] {
        let san = name
            .clone()
            .try_into()
            .map_err(|e| TlsError::BadMaterial(format!("SAN {name}: {e}")))?;
        params.subject_alt_names.push(SanType::DnsName(san));
    }

    let key = KeyPair::generate()?;
    let cert = params.signed_by(&key, ca, ca_key)?;
    Ok((cert.pem(), key.serialize_pem()))
}

/// Mint a fresh CA and server certificate for the webhook service.
pub fn mint_material(service: &str, namespace: &str) -> Result<TlsMaterial, TlsError> {
    let (ca, ca_key) = mint_ca()?;
    let (cert_pem, key_pem) = mint_server_cert(&ca, &ca_key, service, namespace)?;
    Ok(TlsMaterial {
        ca_pem: ca.pem(),
        cert_pem,
        key_pem,
    })
}

async fn read_secret(
    client: &kube::Client,
    namespace: &str,
    name: &str,
) -> Result<Option<TlsMaterial>, TlsError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match secrets.get(name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(err)) if err.code == 404 => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let data = secret.data.unwrap_or_default();
    let field = |key: &str| {
        data.get(key)
            .map(|b| String::from_utf8_lossy(&b.0).into_owned())
            .ok_or_else(|| TlsError::BadMaterial(format!("secret is missing {key}")))
    };

    Ok(Some(TlsMaterial {
        ca_pem: field(KEY_CA_CERT)?,
        cert_pem: field(KEY_TLS_CERT)?,
        key_pem: field(KEY_TLS_KEY)?,
    }))
}

async fn write_secret(
    client: &kube::Client,
    namespace: &str,
    name: &str,
    material: &TlsMaterial,
) -> Result<(), TlsError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let mut data = BTreeMap::new();
    data.insert(
        KEY_CA_CERT.to_string(),
        ByteString(material.ca_pem.as_bytes().to_vec()),
    );
    data.insert(
        KEY_TLS_CERT.to_string(),
        ByteString(material.cert_pem.as_bytes().to_vec()),
    );
    data.insert(
        KEY_TLS_KEY.to_string(),
        ByteString(material.key_pem.as_bytes().to_vec()),
    );

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/managed-by".to_string(),
                    "zoneguard".to_string(),
                )]
                .into(),
            ),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    };

    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 409 => {
            secrets
                .patch(name, &PatchParams::default(), &Patch::Merge(&secret))
                .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Stamp the CA into every webhook of the eviction configuration.
///
/// The object is read, modified and replaced whole: a merge patch on
/// `webhooks` would overwrite the list rather than one entry.
pub async fn sync_webhook_ca(client: &kube::Client, ca_der: &[u8]) -> Result<(), TlsError> {
    let configs: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    let mut config = configs.get(WEBHOOK_CONFIG_NAME).await?;

    for webhook in config.webhooks.get_or_insert_with(Vec::new) {
        webhook.client_config.ca_bundle = Some(ByteString(ca_der.to_vec()));
    }

    configs
        .replace(WEBHOOK_CONFIG_NAME, &PostParams::default(), &config)
        .await?;

    Ok(())
}

/// Load-or-mint the webhook certificate material.
///
/// Existing material in the Secret survives restarts so the caBundle
/// stays stable; the webhook configuration is re-stamped either way in
/// case it was recreated since.
pub async fn ensure_tls(
    client: &kube::Client,
    service: &str,
    namespace: &str,
    secret_name: &str,
) -> Result<TlsMaterial, TlsError> {
    let material = match read_secret(client, namespace, secret_name).await? {
        Some(material) => {
            info!(secret = secret_name, "Loaded webhook TLS material from Secret");
            material
        }
        None => {
            let material = mint_material(service, namespace)?;
            write_secret(client, namespace, secret_name, &material).await?;
            info!(secret = secret_name, "Minted and stored new webhook TLS material");
            material
        }
    };

    if let Err(e) = sync_webhook_ca(client, &material.ca_der()?).await {
        warn!(error = %e, config = WEBHOOK_CONFIG_NAME, "Unable to stamp CA into the webhook configuration (it may not be applied yet)");
    }

    Ok(material)
}

/// rustls server config from the PEM material.
pub fn server_tls_config(material: &TlsMaterial) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(material.cert_pem.as_bytes()))
            .filter_map(|c| c.ok())
            .collect();
    if certs.is_empty() {
        return Err(TlsError::BadMaterial("no certificate in PEM".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(material.key_pem.as_bytes()))
        .map_err(|e| TlsError::BadMaterial(format!("private key: {e}")))?
        .ok_or_else(|| TlsError::BadMaterial("no private key in PEM".to_string()))?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TlsError::BadMaterial(format!("protocol versions: {e}")))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| TlsError::BadMaterial(format!("certificate chain: {e}")))?;

    Ok(Arc::new(config))
}
