//! Stealth Addresses
//!
//! Stealth addresses provide recipient privacy:
//! - Sender derives a fresh one-time key for every payment
//! - Recipient finds payments with the scan key alone
//! - Only the spend key holder can spend them
//!
//! Sender:
//! - Random r, R = r*G (ephemeral key)
//! - S = r*A (shared point, A = scan public key)
//! - view_tag = H(S)[0]
//! - P = B + Hs(S || index)*G (B = spend public key)
//!
//! Recipient recomputes S = a*R, checks the view tag, then P.

use crate::crypto::hash::{hash_to_scalar, sha256, sha256_multi, sha256d};
use crate::crypto::ristretto::{basepoint, RingPoint};
use crate::crypto::scalar::{random_nonzero_scalar, scalar_from_canonical};
use crate::{Error, Result};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VIEW_TAG_DOMAIN: &[u8] = b"PRIV-stealth-viewtag-v1";
const TWEAK_DOMAIN: &[u8] = b"PRIV-stealth-tweak-v1";

/// Address string prefix
pub const ADDRESS_HRP: &str = "sx1";
/// Version byte inside the address payload
pub const ADDRESS_VERSION: u8 = 0x2A;

/// Ceiling on ephemeral keys tried for a prefixed address
pub const MAX_PREFIX_ATTEMPTS: u64 = 1 << 20;

/// Prefix filter: payments to this address carry an ephemeral key whose
/// hash starts with `value`'s top `bits` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPrefix {
    pub bits: u8,
    pub value: u32,
}

impl AddressPrefix {
    pub fn new(bits: u8, value: u32) -> Option<Self> {
        if bits == 0 || bits > 32 {
            return None;
        }
        Some(Self { bits, value })
    }

    fn mask(&self) -> u32 {
        if self.bits >= 32 {
            u32::MAX
        } else {
            !(u32::MAX >> self.bits)
        }
    }

    /// Does SHA-256(ephemeral key) fall under this prefix?
    pub fn matches(&self, ephemeral: &RingPoint) -> bool {
        let digest = sha256(&ephemeral.0);
        let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        (head & self.mask()) == (self.value & self.mask())
    }

    /// Grinding budget for the sender: 2^(bits+4), at most
    /// `MAX_PREFIX_ATTEMPTS`
    fn max_attempts(&self) -> u64 {
        (1u64 << (u32::from(self.bits) + 4)).min(MAX_PREFIX_ATTEMPTS)
    }
}

/// Public stealth address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealthAddress {
    pub scan_public: RingPoint,
    pub spend_public: RingPoint,
    pub prefix: Option<AddressPrefix>,
    /// Wallet-local name, never encoded
    #[serde(default)]
    pub label: Option<String>,
}

impl StealthAddress {
    pub fn new(scan_public: RingPoint, spend_public: RingPoint) -> Self {
        Self { scan_public, spend_public, prefix: None, label: None }
    }

    pub fn with_prefix(mut self, prefix: AddressPrefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Both keys decompress and neither is the identity.
    pub fn is_valid(&self) -> bool {
        self.scan_public.is_valid()
            && self.spend_public.is_valid()
            && !self.scan_public.is_identity()
            && !self.spend_public.is_identity()
    }

    fn payload(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(1 + 64 + 1 + 4);
        data.push(ADDRESS_VERSION);
        data.extend_from_slice(&self.scan_public.0);
        data.extend_from_slice(&self.spend_public.0);
        match self.prefix {
            Some(prefix) => {
                data.push(prefix.bits);
                data.extend_from_slice(&prefix.value.to_be_bytes());
            }
            None => data.push(0),
        }
        data
    }

    /// `sx1` + hex(payload || checksum)
    pub fn to_address_string(&self) -> String {
        let mut data = self.payload();
        let checksum = sha256d(&data);
        data.extend_from_slice(&checksum[..4]);
        format!("{}{}", ADDRESS_HRP, hex::encode(data))
    }

    pub fn from_address_string(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(ADDRESS_HRP)
            .ok_or_else(|| Error::InvalidInput("stealth address must start with sx1".into()))?;
        let data = hex::decode(body)
            .map_err(|e| Error::InvalidInput(format!("stealth address hex: {}", e)))?;
        if data.len() < 1 + 64 + 1 + 4 {
            return Err(Error::InvalidInput("stealth address too short".into()));
        }

        let (payload, checksum) = data.split_at(data.len() - 4);
        if sha256d(payload)[..4] != *checksum {
            return Err(Error::InvalidInput("stealth address checksum mismatch".into()));
        }
        if payload[0] != ADDRESS_VERSION {
            return Err(Error::InvalidInput(format!("unknown stealth address version {:#x}", payload[0])));
        }

        let scan_public = RingPoint::from_slice(&payload[1..33])
            .ok_or_else(|| Error::InvalidInput("scan key".into()))?;
        let spend_public = RingPoint::from_slice(&payload[33..65])
            .ok_or_else(|| Error::InvalidInput("spend key".into()))?;

        let prefix = match payload[65] {
            0 => {
                if payload.len() != 66 {
                    return Err(Error::InvalidInput("trailing bytes in stealth address".into()));
                }
                None
            }
            bits => {
                if payload.len() != 70 {
                    return Err(Error::InvalidInput("truncated stealth address prefix".into()));
                }
                let value = u32::from_be_bytes([payload[66], payload[67], payload[68], payload[69]]);
                Some(
                    AddressPrefix::new(bits, value)
                        .ok_or_else(|| Error::InvalidInput(format!("prefix length {} out of range", bits)))?,
                )
            }
        };

        let addr = Self { scan_public, spend_public, prefix, label: None };
        if !addr.is_valid() {
            return Err(Error::InvalidInput("stealth address keys are not valid points".into()));
        }
        Ok(addr)
    }
}

/// Recipient secret keys
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StealthSecrets {
    pub scan_secret: Scalar,
    pub spend_secret: Scalar,
}

impl StealthSecrets {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            scan_secret: random_nonzero_scalar(rng),
            spend_secret: random_nonzero_scalar(rng),
        }
    }

    pub fn address(&self) -> StealthAddress {
        StealthAddress::new(
            RingPoint::from_secret(&self.scan_secret),
            RingPoint::from_secret(&self.spend_secret),
        )
    }

    pub fn from_bytes(scan: &[u8; 32], spend: &[u8; 32]) -> Option<Self> {
        Some(Self {
            scan_secret: scalar_from_canonical(scan)?,
            spend_secret: scalar_from_canonical(spend)?,
        })
    }
}

impl std::fmt::Debug for StealthSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StealthSecrets(..)")
    }
}

/// One-time output as it appears on chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealthOutput {
    pub one_time_key: RingPoint,
    pub ephemeral_key: RingPoint,
    pub view_tag: u8,
    pub output_index: u32,
}

fn view_tag(shared: &RistrettoPoint) -> u8 {
    sha256_multi(&[VIEW_TAG_DOMAIN, shared.compress().as_bytes()])[0]
}

fn tweak(shared: &RistrettoPoint, output_index: u32) -> Scalar {
    hash_to_scalar(
        TWEAK_DOMAIN,
        &[shared.compress().as_bytes(), &output_index.to_le_bytes()],
    )
}

/// Derive a destination for `address`.
///
/// Returns the ephemeral secret (the sender may need it for amount
/// encryption) and the output. `None` if the address is invalid or the
/// prefix cannot be satisfied within the grinding budget.
pub fn generate_destination<R: RngCore + CryptoRng>(
    address: &StealthAddress,
    output_index: u32,
    rng: &mut R,
) -> Option<(Scalar, StealthOutput)> {
    if !address.is_valid() {
        return None;
    }
    let scan = address.scan_public.decompress()?;
    let spend = address.spend_public.decompress()?;

    let (ephemeral_secret, ephemeral_key) = match address.prefix {
        None => {
            let r = random_nonzero_scalar(rng);
            (r, RingPoint::from_secret(&r))
        }
        Some(prefix) => {
            let mut found = None;
            for _ in 0..prefix.max_attempts() {
                let r = random_nonzero_scalar(rng);
                let eph = RingPoint::from_secret(&r);
                if prefix.matches(&eph) {
                    found = Some((r, eph));
                    break;
                }
            }
            match found {
                Some(pair) => pair,
                None => {
                    debug!(bits = prefix.bits, "stealth prefix grinding exhausted");
                    return None;
                }
            }
        }
    };

    let shared = ephemeral_secret * scan;
    let one_time = spend + tweak(&shared, output_index) * basepoint();

    Some((
        ephemeral_secret,
        StealthOutput {
            one_time_key: RingPoint::from_point(&one_time),
            ephemeral_key,
            view_tag: view_tag(&shared),
            output_index,
        },
    ))
}

/// Is this output addressed to (scan_secret, spend_public)?
pub fn scan_output(output: &StealthOutput, scan_secret: &Scalar, spend_public: &RingPoint) -> bool {
    let (Some(ephemeral), Some(spend)) = (output.ephemeral_key.decompress(), spend_public.decompress()) else {
        return false;
    };
    if !output.one_time_key.is_valid() {
        return false;
    }

    let shared = scan_secret * ephemeral;
    if view_tag(&shared) != output.view_tag {
        return false;
    }

    let expected = spend + tweak(&shared, output.output_index) * basepoint();
    RingPoint::from_point(&expected) == output.one_time_key
}

/// One-time secret x = b + Hs(a*R || index), checked against the output key.
pub fn derive_spending_key(output: &StealthOutput, scan_secret: &Scalar, spend_secret: &Scalar) -> Option<Scalar> {
    let ephemeral = output.ephemeral_key.decompress()?;
    let shared = scan_secret * ephemeral;
    let x = spend_secret + tweak(&shared, output.output_index);
    if RingPoint::from_secret(&x) != output.one_time_key {
        return None;
    }
    Some(x)
}

/// Shared point as seen by the recipient, for amount decryption.
pub fn recipient_shared_secret(output: &StealthOutput, scan_secret: &Scalar) -> Option<[u8; 32]> {
    let ephemeral = output.ephemeral_key.decompress()?;
    Some((scan_secret * ephemeral).compress().to_bytes())
}

/// Shared point as seen by the sender.
pub fn sender_shared_secret(address: &StealthAddress, ephemeral_secret: &Scalar) -> Option<[u8; 32]> {
    let scan = address.scan_public.decompress()?;
    Some((ephemeral_secret * scan).compress().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_destination_roundtrip() {
        let secrets = StealthSecrets::generate(&mut OsRng);
        let addr = secrets.address();
        assert!(addr.is_valid());

        let (_, out) = generate_destination(&addr, 0, &mut OsRng).unwrap();
        assert!(scan_output(&out, &secrets.scan_secret, &addr.spend_public));

        let x = derive_spending_key(&out, &secrets.scan_secret, &secrets.spend_secret).unwrap();
        assert_eq!(RingPoint::from_secret(&x), out.one_time_key);
    }

    #[test]
    fn test_wrong_recipient() {
        let alice = StealthSecrets::generate(&mut OsRng);
        let bob = StealthSecrets::generate(&mut OsRng);

        let (_, out) = generate_destination(&alice.address(), 0, &mut OsRng).unwrap();
        assert!(!scan_output(&out, &bob.scan_secret, &bob.address().spend_public));
        assert!(derive_spending_key(&out, &bob.scan_secret, &bob.spend_secret).is_none());
    }

    #[test]
    fn test_different_output_indices() {
        let secrets = StealthSecrets::generate(&mut OsRng);
        let addr = secrets.address();
        let r = random_nonzero_scalar(&mut OsRng);
        let shared = r * addr.scan_public.decompress().unwrap();
        assert_ne!(tweak(&shared, 0), tweak(&shared, 1));

        let (_, mut out) = generate_destination(&addr, 3, &mut OsRng).unwrap();
        out.output_index = 4;
        assert!(!scan_output(&out, &secrets.scan_secret, &addr.spend_public));
    }

    #[test]
    fn test_shared_secret_agreement() {
        let secrets = StealthSecrets::generate(&mut OsRng);
        let addr = secrets.address();
        let (r, out) = generate_destination(&addr, 0, &mut OsRng).unwrap();
        assert_eq!(
            sender_shared_secret(&addr, &r),
            recipient_shared_secret(&out, &secrets.scan_secret)
        );
    }

    #[test]
    fn test_invalid_points_fail_closed() {
        let secrets = StealthSecrets::generate(&mut OsRng);
        let bad = StealthAddress::new(RingPoint([0xff; 32]), secrets.address().spend_public);
        assert!(generate_destination(&bad, 0, &mut OsRng).is_none());

        let (_, mut out) = generate_destination(&secrets.address(), 0, &mut OsRng).unwrap();
        out.ephemeral_key = RingPoint([0xff; 32]);
        assert!(!scan_output(&out, &secrets.scan_secret, &secrets.address().spend_public));
    }

    #[test]
    fn test_address_string_roundtrip() {
        let secrets = StealthSecrets::generate(&mut OsRng);
        let addr = secrets.address().with_label("savings");
        let s = addr.to_address_string();
        assert!(s.starts_with("sx1"));

        let parsed = StealthAddress::from_address_string(&s).unwrap();
        assert_eq!(parsed.scan_public, addr.scan_public);
        assert_eq!(parsed.spend_public, addr.spend_public);
        assert_eq!(parsed.label, None);

        let with_prefix = secrets.address().with_prefix(AddressPrefix::new(4, 0xA000_0000).unwrap());
        let parsed = StealthAddress::from_address_string(&with_prefix.to_address_string()).unwrap();
        assert_eq!(parsed.prefix, with_prefix.prefix);
    }

    #[test]
    fn test_address_checksum_rejected() {
        let addr = StealthSecrets::generate(&mut OsRng).address();
        let mut s = addr.to_address_string();
        let last = s.pop().unwrap();
        s.push(if last == '0' { '1' } else { '0' });
        assert!(StealthAddress::from_address_string(&s).is_err());
        assert!(StealthAddress::from_address_string("sx2abcd").is_err());
    }

    #[test]
    fn test_prefix_grinding() {
        let secrets = StealthSecrets::generate(&mut OsRng);
        let prefix = AddressPrefix::new(3, 0x6000_0000).unwrap();
        let addr = secrets.address().with_prefix(prefix);

        let (_, out) = generate_destination(&addr, 0, &mut OsRng).unwrap();
        assert!(prefix.matches(&out.ephemeral_key));
        assert!(scan_output(&out, &secrets.scan_secret, &addr.spend_public));
    }

    #[test]
    fn test_prefix_bounds() {
        assert!(AddressPrefix::new(0, 0).is_none());
        assert!(AddressPrefix::new(33, 0).is_none());
        assert!(AddressPrefix::new(32, 1).is_some());
    }

    #[test]
    fn test_prefix_grinding_budget_capped() {
        assert_eq!(AddressPrefix::new(3, 0).unwrap().max_attempts(), 1 << 7);
        assert_eq!(AddressPrefix::new(16, 0).unwrap().max_attempts(), 1 << 20);
        assert_eq!(AddressPrefix::new(24, 0).unwrap().max_attempts(), MAX_PREFIX_ATTEMPTS);
        assert_eq!(AddressPrefix::new(32, 0).unwrap().max_attempts(), MAX_PREFIX_ATTEMPTS);
    }
}
