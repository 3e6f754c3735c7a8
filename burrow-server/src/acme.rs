//! Plain-HTTP pass-through hook for ACME HTTP-01 challenge responses.
//!
//! Certificate acquisition itself is an external collaborator's job — this
//! core only consumes the resulting PEM file pair (see `config.rs`). What
//! it does own is the narrow seam that collaborator needs: answering
//! `GET /.well-known/acme-challenge/{token}` on the plain-HTTP listener
//! before a certificate has ever been issued.

use async_trait::async_trait;

/// Opaque collaborator call: given a challenge token, return the key
/// authorization string to serve back, if one is currently provisioned.
#[async_trait]
pub trait AcmeChallengeResponder: Send + Sync {
    async fn respond(&self, token: &str) -> Option<String>;
}

/// Default hook used when no ACME collaborator is wired in: every
/// challenge request falls through to 404.
pub struct NoAcmeResponder;

#[async_trait]
impl AcmeChallengeResponder for NoAcmeResponder {
    async fn respond(&self, _token: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_responder_answers_nothing() {
        let responder = NoAcmeResponder;
        assert_eq!(responder.respond("any-token").await, None);
    }
}
