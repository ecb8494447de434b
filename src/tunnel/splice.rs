//! Raw byte splice between client and origin.

use tokio::io::{AsyncRead, AsyncWrite};

use super::TunnelTarget;
use crate::observability::TunnelSummary;

/// Copy bytes in both directions until both sides have closed or one fails.
///
/// EOF on one side is forwarded as a write shutdown to the other, so
/// half-closed exchanges still complete.
pub async fn splice<C, O>(mut client: C, mut origin: O, target: &TunnelTarget) -> TunnelSummary
where
    C: AsyncRead + AsyncWrite + Unpin,
    O: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(&mut client, &mut origin).await {
        Ok((client_to_origin, origin_to_client)) => {
            tracing::debug!(
                tunnel_target = %target,
                client_to_origin,
                origin_to_client,
                "Tunnel closed"
            );
            TunnelSummary {
                target: target.to_string(),
                mode: "raw",
                client_to_origin,
                origin_to_client,
                error: None,
            }
        }
        Err(e) => {
            tracing::debug!(tunnel_target = %target, error = %e, "Tunnel aborted");
            TunnelSummary::failed(target.to_string(), "raw", e.to_string())
        }
    }
}
