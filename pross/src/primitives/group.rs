//! Prime-order group handle used by every protocol component.
//!
//! Components never reach for a process-wide curve. Instead, they are constructed with a
//! [Group] value and perform all element and scalar arithmetic through it (or through the
//! [Element] trait its associated types implement). [P256] is the default instantiation.

use bytes::{Buf, BufMut};
use commonware_codec::Error as CodecError;
use p256::{
    elliptic_curve::{
        ff::{Field, PrimeField},
        group::{Group as GroupOps, GroupEncoding},
        hash2curve::{ExpandMsgXmd, GroupDigest},
    },
    NistP256, ProjectivePoint, Scalar,
};
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use std::fmt::Debug;
use zeroize::Zeroize;

/// Domain separation tag used when hashing to P-256.
const HASH_TO_CURVE_DST: &[u8] = b"_COMMONWARE_PROSS_P256_XMD:SHA-256_SSWU_RO_";

/// Label hashed to the group to derive the second Pedersen generator.
const PEDERSEN_LABEL: &[u8] = b"_COMMONWARE_PROSS_PEDERSEN_H";

/// An element of a group (or the scalar field acting on it) that can serve as
/// a polynomial coefficient.
pub trait Element: Copy + Debug + Eq + Send + Sync + 'static {
    /// The scalar field acting on this element.
    type Scalar: PrimeField;

    /// Returns the additive identity.
    fn zero() -> Self;

    /// Adds to self in-place.
    fn add(&mut self, rhs: &Self);

    /// Multiplies self in-place by a scalar.
    fn mul(&mut self, rhs: &Self::Scalar);
}

impl Element for Scalar {
    type Scalar = Scalar;

    fn zero() -> Self {
        Scalar::ZERO
    }

    fn add(&mut self, rhs: &Self) {
        *self += rhs;
    }

    fn mul(&mut self, rhs: &Self::Scalar) {
        *self *= rhs;
    }
}

impl Element for ProjectivePoint {
    type Scalar = Scalar;

    fn zero() -> Self {
        ProjectivePoint::IDENTITY
    }

    fn add(&mut self, rhs: &Self) {
        *self += rhs;
    }

    fn mul(&mut self, rhs: &Self::Scalar) {
        *self *= rhs;
    }
}

/// Returns the size of an encoded element.
pub fn element_size<E: GroupEncoding>() -> usize {
    E::Repr::default().as_ref().len()
}

/// Returns the size of an encoded scalar.
pub fn scalar_size<F: PrimeField>() -> usize {
    F::Repr::default().as_ref().len()
}

pub fn write_element<E: GroupEncoding>(element: &E, buf: &mut impl BufMut) {
    buf.put_slice(element.to_bytes().as_ref());
}

/// Reads a group element, rejecting points not on the curve.
pub fn read_element<E: GroupEncoding>(buf: &mut impl Buf) -> Result<E, CodecError> {
    let mut repr = E::Repr::default();
    if buf.remaining() < repr.as_ref().len() {
        return Err(CodecError::EndOfBuffer);
    }
    buf.copy_to_slice(repr.as_mut());
    Option::from(E::from_bytes(&repr))
        .ok_or(CodecError::Invalid("pross::primitives::Element", "not on curve"))
}

pub fn write_scalar<F: PrimeField>(scalar: &F, buf: &mut impl BufMut) {
    buf.put_slice(scalar.to_repr().as_ref());
}

/// Reads a scalar, rejecting non-canonical encodings.
pub fn read_scalar<F: PrimeField>(buf: &mut impl Buf) -> Result<F, CodecError> {
    let mut repr = F::Repr::default();
    if buf.remaining() < repr.as_ref().len() {
        return Err(CodecError::EndOfBuffer);
    }
    buf.copy_to_slice(repr.as_mut());
    Option::from(F::from_repr(repr))
        .ok_or(CodecError::Invalid("pross::primitives::Scalar", "not canonical"))
}

/// A prime-order group with a distinguished generator and a hash-to-curve function.
pub trait Group: Clone + Debug + PartialEq + Eq + Send + Sync + 'static {
    /// Integers modulo the group order `r`.
    type Scalar: PrimeField + Zeroize + Element<Scalar = Self::Scalar>;

    /// Points of the group.
    type Element: GroupOps<Scalar = Self::Scalar> + GroupEncoding + Element<Scalar = Self::Scalar>;

    /// Human-readable name of the group.
    fn name(&self) -> &'static str;

    /// Deterministically maps a message to a group element with unknown discrete log.
    fn hash_to_curve(&self, message: &[u8]) -> Self::Element;

    /// Second generator `h` used by Pedersen commitments.
    fn pedersen(&self) -> Self::Element;

    /// Returns the generator `g`.
    fn generator(&self) -> Self::Element {
        Self::Element::generator()
    }

    /// Returns the point at infinity.
    fn identity(&self) -> Self::Element {
        Self::Element::identity()
    }

    fn add(&self, p: &Self::Element, q: &Self::Element) -> Self::Element {
        *p + *q
    }

    fn double(&self, p: &Self::Element) -> Self::Element {
        p.double()
    }

    fn multiply(&self, p: &Self::Element, k: &Self::Scalar) -> Self::Element {
        *p * *k
    }

    /// Returns `g^k`.
    fn exp(&self, k: &Self::Scalar) -> Self::Element {
        self.multiply(&self.generator(), k)
    }

    /// Samples a uniformly random scalar.
    fn random_scalar<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Self::Scalar {
        Self::Scalar::random(&mut *rng)
    }

    /// Size of an encoded element.
    fn element_size(&self) -> usize {
        element_size::<Self::Element>()
    }

    /// Size of an encoded scalar.
    fn scalar_size(&self) -> usize {
        scalar_size::<Self::Scalar>()
    }

    fn encode(&self, p: &Self::Element) -> Vec<u8> {
        p.to_bytes().as_ref().to_vec()
    }

    /// Decodes an element, returning `None` if the bytes are not a point on the curve.
    fn decode(&self, bytes: &[u8]) -> Option<Self::Element> {
        let mut repr = <Self::Element as GroupEncoding>::Repr::default();
        if repr.as_ref().len() != bytes.len() {
            return None;
        }
        repr.as_mut().copy_from_slice(bytes);
        Option::from(Self::Element::from_bytes(&repr))
    }

    fn is_on_curve(&self, bytes: &[u8]) -> bool {
        self.decode(bytes).is_some()
    }

    fn encode_scalar(&self, k: &Self::Scalar) -> Vec<u8> {
        k.to_repr().as_ref().to_vec()
    }

    /// Decodes a canonical scalar encoding.
    fn decode_scalar(&self, bytes: &[u8]) -> Option<Self::Scalar> {
        let mut repr = <Self::Scalar as PrimeField>::Repr::default();
        if repr.as_ref().len() != bytes.len() {
            return None;
        }
        repr.as_mut().copy_from_slice(bytes);
        Option::from(Self::Scalar::from_repr(repr))
    }

    /// Reduces a big-endian byte string modulo the group order.
    fn reduce(&self, bytes: &[u8]) -> Self::Scalar {
        let radix = Self::Scalar::from(256u64);
        bytes.iter().fold(Self::Scalar::ZERO, |acc, byte| {
            acc * radix + Self::Scalar::from(*byte as u64)
        })
    }
}

/// NIST P-256.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct P256 {
    h: ProjectivePoint,
}

impl P256 {
    pub fn new() -> Self {
        Self {
            h: hash_to_p256(PEDERSEN_LABEL),
        }
    }
}

impl Default for P256 {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_to_p256(message: &[u8]) -> ProjectivePoint {
    NistP256::hash_from_bytes::<ExpandMsgXmd<Sha256>>(&[message], &[HASH_TO_CURVE_DST])
        .expect("domain separation tag is valid")
}

impl Group for P256 {
    type Scalar = Scalar;
    type Element = ProjectivePoint;

    fn name(&self) -> &'static str {
        "P-256"
    }

    fn hash_to_curve(&self, message: &[u8]) -> Self::Element {
        hash_to_p256(message)
    }

    fn pedersen(&self) -> Self::Element {
        self.h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use rand::{rngs::StdRng, SeedableRng};

    #[test_traced]
    fn test_encoding() {
        let group = P256::new();
        let mut rng = StdRng::seed_from_u64(0);
        let k = group.random_scalar(&mut rng);
        let p = group.exp(&k);

        let encoded = group.encode(&p);
        assert_eq!(encoded.len(), group.element_size());
        assert_eq!(group.decode(&encoded), Some(p));

        let encoded = group.encode_scalar(&k);
        assert_eq!(encoded.len(), group.scalar_size());
        assert_eq!(group.decode_scalar(&encoded), Some(k));
    }

    #[test_traced]
    fn test_identity_encoding() {
        let group = P256::new();
        let encoded = group.encode(&group.identity());
        assert_eq!(group.decode(&encoded), Some(group.identity()));
    }

    #[test_traced]
    fn test_element_codec() {
        let group = P256::new();
        let mut buf = Vec::new();
        write_element(&group.generator(), &mut buf);
        write_element(&group.identity(), &mut buf);
        assert_eq!(buf.len(), 2 * group.element_size());

        let mut reader = &buf[..];
        assert_eq!(read_element::<ProjectivePoint>(&mut reader).unwrap(), group.generator());
        assert_eq!(read_element::<ProjectivePoint>(&mut reader).unwrap(), group.identity());
        assert!(matches!(
            read_element::<ProjectivePoint>(&mut reader),
            Err(CodecError::EndOfBuffer)
        ));

        let mut invalid = group.encode(&group.generator());
        invalid[0] = 0x07;
        assert!(matches!(
            read_element::<ProjectivePoint>(&mut &invalid[..]),
            Err(CodecError::Invalid(_, "not on curve"))
        ));
    }

    #[test_traced]
    fn test_non_canonical_scalar() {
        let bytes = [0xff; 32];
        assert!(matches!(
            read_scalar::<Scalar>(&mut &bytes[..]),
            Err(CodecError::Invalid(_, "not canonical"))
        ));

        let mut buf = Vec::new();
        write_scalar(&Scalar::from(99u64), &mut buf);
        assert_eq!(read_scalar::<Scalar>(&mut &buf[..]).unwrap(), Scalar::from(99u64));
    }

    #[test_traced]
    fn test_not_on_curve() {
        let group = P256::new();
        let mut bytes = group.encode(&group.generator());
        assert!(!group.is_on_curve(&bytes[1..]));
        bytes[0] = 0x07;
        assert!(!group.is_on_curve(&bytes));
    }

    #[test_traced]
    fn test_double() {
        let group = P256::new();
        let g = group.generator();
        assert_eq!(group.double(&g), group.add(&g, &g));
        assert_eq!(group.double(&g), group.exp(&Scalar::from(2u64)));
    }

    #[test_traced]
    fn test_hash_to_curve() {
        let group = P256::new();
        let a = group.hash_to_curve(b"hello");
        let b = group.hash_to_curve(b"hello");
        let c = group.hash_to_curve(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(group.pedersen(), group.generator());
    }

    #[test_traced]
    fn test_reduce() {
        let group = P256::new();
        assert_eq!(group.reduce(&[0x01, 0x00]), Scalar::from(256u64));
        assert_eq!(group.reduce(&[]), Scalar::ZERO);
    }
}
