//! Security-context derivation.
//!
//! Turns one shared master secret into the sender and recipient key material
//! two peers need for object security. Each direction gets a key and a base
//! IV, expanded from a single HKDF-Extract with the CBOR context label
//!
//! ```text
//! info = [ id : bstr, alg : int, type : "Key" / "IV", L : uint ]
//! ```
//!
//! Because every output depends only on its own `id`, swapping the sender
//! and recipient identifiers swaps the two derived directions. That is what
//! lets two independently configured peers arrive at matching material.

use ciborium::value::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;
use crate::algorithm::{AeadAlgorithm, KeyAgreementAlgorithm};
use crate::hkdf::{Prk, hkdf_extract};

const KEY_LABEL: &str = "Key";
const IV_LABEL: &str = "IV";

/// One direction's derived key and base IV.
///
/// Key material is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EndpointContext {
    #[zeroize(skip)]
    id: Vec<u8>,
    #[zeroize(skip)]
    algorithm: AeadAlgorithm,
    key: Vec<u8>,
    base_iv: Vec<u8>,
}

impl EndpointContext {
    /// Identifier this direction was derived for.
    #[must_use]
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// AEAD algorithm the material is sized for.
    #[must_use]
    pub fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    /// Raw key bytes.
    ///
    /// # Security
    ///
    /// Exposes the raw key material.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Base IV, combined with a sequence number by the AEAD layer.
    #[must_use]
    pub fn base_iv(&self) -> &[u8] {
        &self.base_iv
    }
}

impl std::fmt::Debug for EndpointContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointContext")
            .field("id", &hex::encode(&self.id))
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .field("base_iv", &"<redacted>")
            .finish()
    }
}

/// Sender and recipient material for one peer relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    sender: EndpointContext,
    recipient: EndpointContext,
}

impl SecurityContext {
    /// Material for protecting outgoing messages.
    #[must_use]
    pub fn sender(&self) -> &EndpointContext {
        &self.sender
    }

    /// Material for verifying incoming messages.
    #[must_use]
    pub fn recipient(&self) -> &EndpointContext {
        &self.recipient
    }

    /// AEAD algorithm both directions are sized for.
    #[must_use]
    pub fn algorithm(&self) -> AeadAlgorithm {
        self.sender.algorithm
    }

    /// Split into `(sender, recipient)`.
    #[must_use]
    pub fn into_parts(self) -> (EndpointContext, EndpointContext) {
        (self.sender, self.recipient)
    }
}

/// Stateless deriver carrying the span its diagnostics are recorded in.
#[derive(Debug, Clone)]
pub struct ContextDeriver {
    span: tracing::Span,
}

impl Default for ContextDeriver {
    fn default() -> Self {
        Self::new(tracing::debug_span!("security_context"))
    }
}

impl ContextDeriver {
    /// Create a deriver that logs inside `span`.
    #[must_use]
    pub fn new(span: tracing::Span) -> Self {
        Self { span }
    }

    /// Derive a security context.
    ///
    /// A missing salt selects the HKDF default (all-zero) salt.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidInput` if `secret` is empty or the two
    /// identifiers are equal. No partial context is ever returned.
    pub fn derive(
        &self,
        secret: &[u8],
        sender_id: &[u8],
        recipient_id: &[u8],
        salt: Option<&[u8]>,
        aead: AeadAlgorithm,
        key_agreement: KeyAgreementAlgorithm,
    ) -> Result<SecurityContext, CryptoError> {
        let _entered = self.span.enter();

        if secret.is_empty() {
            tracing::debug!("rejecting derivation: empty master secret");
            return Err(CryptoError::InvalidInput("master secret must not be empty"));
        }
        if sender_id == recipient_id {
            tracing::debug!(id = %hex::encode(sender_id), "rejecting derivation: identical ids");
            return Err(CryptoError::InvalidInput(
                "sender and recipient identifiers must differ",
            ));
        }

        tracing::debug!(
            sender = %hex::encode(sender_id),
            recipient = %hex::encode(recipient_id),
            %aead,
            %key_agreement,
            salted = salt.is_some(),
            "deriving security context"
        );

        let prk = hkdf_extract(key_agreement.hash(), salt, secret);
        let sender = expand_endpoint(&prk, sender_id, aead)?;
        let recipient = expand_endpoint(&prk, recipient_id, aead)?;

        Ok(SecurityContext { sender, recipient })
    }

    /// Derive from raw COSE algorithm identifiers.
    ///
    /// `key_agreement_id` of `None` selects ECDH-SS + HKDF-256.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::UnsupportedAlgorithm` for unknown identifiers,
    /// otherwise as [`ContextDeriver::derive`].
    pub fn derive_from_ids(
        &self,
        secret: &[u8],
        sender_id: &[u8],
        recipient_id: &[u8],
        salt: Option<&[u8]>,
        aead_id: i64,
        key_agreement_id: Option<i64>,
    ) -> Result<SecurityContext, CryptoError> {
        let aead = AeadAlgorithm::try_from(aead_id)?;
        let key_agreement = key_agreement_id
            .map(KeyAgreementAlgorithm::try_from)
            .transpose()?
            .unwrap_or_default();
        self.derive(secret, sender_id, recipient_id, salt, aead, key_agreement)
    }
}

/// Derive a security context with a default deriver.
///
/// # Errors
///
/// See [`ContextDeriver::derive`].
pub fn derive_context(
    secret: &[u8],
    sender_id: &[u8],
    recipient_id: &[u8],
    salt: Option<&[u8]>,
    aead: AeadAlgorithm,
    key_agreement: KeyAgreementAlgorithm,
) -> Result<SecurityContext, CryptoError> {
    ContextDeriver::default().derive(secret, sender_id, recipient_id, salt, aead, key_agreement)
}

/// Derive a security context from raw COSE identifiers with a default deriver.
///
/// # Errors
///
/// See [`ContextDeriver::derive_from_ids`].
pub fn derive_context_from_ids(
    secret: &[u8],
    sender_id: &[u8],
    recipient_id: &[u8],
    salt: Option<&[u8]>,
    aead_id: i64,
    key_agreement_id: Option<i64>,
) -> Result<SecurityContext, CryptoError> {
    ContextDeriver::default().derive_from_ids(
        secret,
        sender_id,
        recipient_id,
        salt,
        aead_id,
        key_agreement_id,
    )
}

fn expand_endpoint(
    prk: &Prk,
    id: &[u8],
    aead: AeadAlgorithm,
) -> Result<EndpointContext, CryptoError> {
    let key_len = aead.key_len();
    let iv_len = aead.iv_len();

    let key = prk.expand_to_vec(&info_label(id, aead, KEY_LABEL, key_len)?, key_len)?;
    let base_iv = prk.expand_to_vec(&info_label(id, aead, IV_LABEL, iv_len)?, iv_len)?;

    Ok(EndpointContext {
        id: id.to_vec(),
        algorithm: aead,
        key,
        base_iv,
    })
}

fn info_label(
    id: &[u8],
    aead: AeadAlgorithm,
    kind: &str,
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let label = Value::Array(vec![
        Value::Bytes(id.to_vec()),
        Value::Integer(aead.cose_id().into()),
        Value::Text(kind.to_owned()),
        Value::Integer((len as u64).into()),
    ]);

    let mut encoded = Vec::with_capacity(id.len() + 16);
    ciborium::ser::into_writer(&label, &mut encoded)
        .map_err(|e| CryptoError::LabelEncoding(e.to_string()))?;
    Ok(encoded)
}
