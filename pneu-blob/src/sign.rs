use std::time::SystemTime;

use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SigningParams, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;

use crate::BlobError;

/// The `*-iam` endpoints sit behind an IAM-authorized API gateway, so
/// requests are signed as the `execute-api` service.
const SIGNING_SERVICE: &str = "execute-api";

/// Sign `req` in place with SigV4. The body must already be fully
/// buffered: the signature covers its SHA-256, and the hash only lands in
/// the canonical request (no `X-Amz-Content-Sha256` header is emitted).
pub(crate) async fn sign_request(
    req: &mut http::Request<Vec<u8>>,
    credentials: &SharedCredentialsProvider,
    region: &str,
) -> Result<(), BlobError> {
    let creds = credentials
        .provide_credentials()
        .await
        .map_err(|e| BlobError::ServerFail(format!("unable to resolve credentials: {}", e)))?;
    let identity: Identity = creds.into();

    let params: SigningParams = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(SIGNING_SERVICE)
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| BlobError::ServerFail(format!("signing parameters: {}", e)))?
        .into();

    let signable = SignableRequest::new(
        req.method().as_str(),
        req.uri().to_string(),
        req.headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or_default())),
        SignableBody::Bytes(req.body()),
    )
    .map_err(|e| BlobError::ServerFail(format!("unsignable request: {}", e)))?;

    let (instructions, _signature) = sign(signable, &params)
        .map_err(|e| BlobError::ServerFail(format!("request signing: {}", e)))?
        .into_parts();
    instructions.apply_to_request_http1x(req);

    Ok(())
}
