//! EIP-712 typed data for ERC-3009 `transferWithAuthorization`.
//!
//! Both the caller (when signing) and the facilitator (when verifying) rebuild the same
//! struct hash from a [`PaymentAuthorization`]. The domain is
//! `{ name, version, chainId, verifyingContract = asset }`, with `name` and `version`
//! taken from [`PaymentTerms::extra`].

use alloy_primitives::{Address, B256, Signature, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};

use crate::networks::chain_id_by_network;
use crate::proto::{PaymentAuthorization, PaymentTerms};

sol!(
    /// ERC-3009 authorization as it appears in EIP-712 typed data.
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

impl From<&PaymentAuthorization> for TransferWithAuthorization {
    fn from(authorization: &PaymentAuthorization) -> Self {
        TransferWithAuthorization {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
            validAfter: U256::from(authorization.valid_after.as_secs()),
            validBefore: U256::from(authorization.valid_before.as_secs()),
            nonce: authorization.nonce,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Eip712Error {
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("Malformed signature: {0}")]
    Signature(#[from] alloy_primitives::SignatureError),
}

/// Builds the signing domain of the asset named in `terms`.
///
/// Missing `extra` yields empty name and version.
pub fn domain_for(terms: &PaymentTerms) -> Result<Eip712Domain, Eip712Error> {
    let chain_id = chain_id_by_network(&terms.network)
        .ok_or_else(|| Eip712Error::UnsupportedNetwork(terms.network.clone()))?;
    let (name, version) = match &terms.extra {
        None => (String::new(), String::new()),
        Some(extra) => (extra.name.clone(), extra.version.clone()),
    };
    Ok(eip712_domain! {
        name: name,
        version: version,
        chain_id: chain_id,
        verifying_contract: terms.asset,
    })
}

pub fn signing_hash(authorization: &PaymentAuthorization, domain: &Eip712Domain) -> B256 {
    TransferWithAuthorization::from(authorization).eip712_signing_hash(domain)
}

/// Recovers the signer of `authorization` from a 65-byte `r || s || v` signature.
pub fn recover_signer(
    authorization: &PaymentAuthorization,
    signature: &[u8],
    domain: &Eip712Domain,
) -> Result<Address, Eip712Error> {
    let signature = Signature::from_raw(signature)?;
    let hash = signing_hash(authorization, domain);
    let signer = signature.recover_address_from_prehash(&hash)?;
    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{PaymentTermsExtra, Scheme};
    use crate::timestamp::UnixTimestamp;
    use alloy_primitives::address;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    fn terms() -> PaymentTerms {
        PaymentTerms {
            scheme: Scheme::Exact,
            network: "base-sepolia".to_string(),
            max_amount_required: U256::from(50_000u64),
            resource: "https://api.example.com/mint".parse().unwrap(),
            description: String::new(),
            mime_type: "application/json".to_string(),
            pay_to: address!("0x2222222222222222222222222222222222222222"),
            max_timeout_seconds: 60,
            asset: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
            extra: Some(PaymentTermsExtra {
                name: "USDC".to_string(),
                version: "2".to_string(),
            }),
        }
    }

    fn authorization(from: Address) -> PaymentAuthorization {
        PaymentAuthorization {
            from,
            to: address!("0x2222222222222222222222222222222222222222"),
            value: U256::from(50_000u64),
            valid_after: UnixTimestamp::from_secs(1_700_000_000),
            valid_before: UnixTimestamp::from_secs(1_700_000_060),
            nonce: B256::repeat_byte(3),
        }
    }

    #[test]
    fn recovers_the_signer() {
        let signer = PrivateKeySigner::random();
        let authorization = authorization(signer.address());
        let domain = domain_for(&terms()).unwrap();
        let hash = signing_hash(&authorization, &domain);
        let signature = signer.sign_hash_sync(&hash).unwrap();

        let recovered = recover_signer(&authorization, &signature.as_bytes(), &domain).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn tampered_authorization_recovers_someone_else() {
        let signer = PrivateKeySigner::random();
        let mut authorization = authorization(signer.address());
        let domain = domain_for(&terms()).unwrap();
        let signature = signer
            .sign_hash_sync(&signing_hash(&authorization, &domain))
            .unwrap();

        authorization.value = U256::from(1u64);
        let recovered = recover_signer(&authorization, &signature.as_bytes(), &domain).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn domain_depends_on_network() {
        let base_sepolia = domain_for(&terms()).unwrap();
        let mut other = terms();
        other.network = "eip155:84533".to_string();
        let other = domain_for(&other).unwrap();
        assert_ne!(base_sepolia.separator(), other.separator());

        let mut unknown = terms();
        unknown.network = "moonbase".to_string();
        assert!(matches!(
            domain_for(&unknown),
            Err(Eip712Error::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn short_signature_is_malformed() {
        let domain = domain_for(&terms()).unwrap();
        let result = recover_signer(&authorization(Address::ZERO), &[1u8; 10], &domain);
        assert!(matches!(result, Err(Eip712Error::Signature(_))));
    }
}
