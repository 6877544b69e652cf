//! Calling-convention signatures for runtime stubs
//!
//! A `CallSignature` lists the value kinds compiled code materializes for a
//! stub call (the domain) and the kinds it gets back (the range). The native
//! implementation consumes the domain positionally, so a signature that
//! disagrees with its native function is not detectable at generation time
//! and corrupts state at run time. Keep each shape next to its native
//! function's parameter list in `runtime::natives`.
//!
//! Signatures are memoized per (family, parameters): building one may
//! allocate shared type metadata in a full VM, so every distinct shape is
//! constructed exactly once per registry and shared through `Arc`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::catalog::StubId;
use super::types::{ValueKind, VectorKind};
use crate::error::SignatureRangeError;

/// Hash family of a digest compression intrinsic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestVariant {
    /// SHA-1 (64-byte blocks, 5-word state)
    Sha1,
    /// SHA-256 (64-byte blocks, 8-word state)
    Sha256,
    /// SHA-512 (128-byte blocks, 8-doubleword state)
    Sha512,
    /// SHA-3 (rate-dependent block size passed explicitly)
    Sha3,
}

/// Signature family plus its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureShape {
    /// (klass, is_larval) -> obj
    NewInstance,
    /// (klass, length) -> array
    NewArray,
    /// (klass, len1, .., lenN) -> array, N in 2..=5
    MultiNewArray(u32),
    /// (klass, dims) -> array
    MultiNewArrayN,
    /// (obj, lock record) -> ()
    MonitorEnter,
    /// (obj, lock record) -> ()
    MonitorExit,
    /// (obj) -> ()
    MonitorNotify,
    /// (trap request) -> resume address
    UncommonTrap,
    /// () -> handler address; the exception travels in the context
    ExceptionBlob,
    /// (exception) -> ()
    Athrow,
    /// (exception) -> exception, delivered to the caller's handler
    Rethrow,
    /// (double) -> double
    MathDD,
    /// (double, double) -> double
    MathDDD,
    /// N vector operands -> vector
    VectorMath {
        /// Operand count (1 or 2)
        num_args: u32,
        /// Operand shape
        input: VectorKind,
        /// Result shape
        output: VectorKind,
    },
    /// (src, src_pos, dest, dest_pos, length) -> ()
    SlowArraycopy,
    /// (obj) -> ()
    RegisterFinalizer,
    /// (flat array, index) -> obj
    LoadUnknownInline,
    /// (buffer, flat array, index) -> ()
    StoreUnknownInline,
    /// () -> (), exception always pending afterwards
    ImplicitThrow,
    /// () -> ()
    VoidVoid,
    /// () -> long
    VoidLong,
    /// (long) -> float
    L2F,
    /// (crc, buf, len) -> crc
    UpdateBytesCrc32,
    /// (haystack, haystack_len, needle, needle_len) -> index
    StringIndexOf,
    /// (block, state [, block_size]) -> ()
    Digest(DigestVariant),
    /// (task, hide) -> ()
    NotifyTask,
}

impl SignatureShape {
    /// Reject parameter tuples outside the family's supported range
    pub fn validate(&self) -> Result<(), SignatureRangeError> {
        match *self {
            SignatureShape::MultiNewArray(ndim) if !(2..=5).contains(&ndim) => {
                Err(SignatureRangeError::Dimensions(ndim))
            }
            SignatureShape::VectorMath { num_args, input, output } => {
                if !(1..=2).contains(&num_args) {
                    return Err(SignatureRangeError::VectorArity(num_args));
                }
                for kind in [input, output] {
                    if !kind.is_legal() {
                        return Err(SignatureRangeError::VectorShape(kind));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn build(&self) -> CallSignature {
        use ValueKind::*;

        match *self {
            SignatureShape::NewInstance => CallSignature::new(vec![Ref, Int], vec![Ref]),
            SignatureShape::NewArray => CallSignature::new(vec![Ref, Int], vec![Ref]),
            SignatureShape::MultiNewArray(ndim) => {
                let mut domain = vec![Ref];
                domain.extend(std::iter::repeat(Int).take(ndim as usize));
                CallSignature::new(domain, vec![Ref])
            }
            SignatureShape::MultiNewArrayN => CallSignature::new(vec![Ref, Ref], vec![Ref]),
            SignatureShape::MonitorEnter => CallSignature::new(vec![Ref, Ptr], vec![]),
            SignatureShape::MonitorExit => CallSignature::new(vec![Ref, Ptr], vec![]),
            SignatureShape::MonitorNotify => CallSignature::new(vec![Ref], vec![]),
            SignatureShape::UncommonTrap => CallSignature::new(vec![Int], vec![Address]),
            SignatureShape::ExceptionBlob => CallSignature::new(vec![], vec![Address]),
            SignatureShape::Athrow => CallSignature::new(vec![Ref], vec![]),
            SignatureShape::Rethrow => CallSignature::new(vec![Ref], vec![Ref]),
            SignatureShape::MathDD => CallSignature::new(vec![Double], vec![Double]),
            SignatureShape::MathDDD => CallSignature::new(vec![Double, Double], vec![Double]),
            SignatureShape::VectorMath { num_args, input, output } => CallSignature::new(
                vec![Vector(input); num_args as usize],
                vec![Vector(output)],
            ),
            SignatureShape::SlowArraycopy => {
                CallSignature::new(vec![Ref, Int, Ref, Int, Int], vec![])
            }
            SignatureShape::RegisterFinalizer => CallSignature::new(vec![Ref], vec![]),
            SignatureShape::LoadUnknownInline => CallSignature::new(vec![Ref, Int], vec![Ref]),
            SignatureShape::StoreUnknownInline => {
                CallSignature::new(vec![Ref, Ref, Int], vec![])
            }
            SignatureShape::ImplicitThrow | SignatureShape::VoidVoid => {
                CallSignature::new(vec![], vec![])
            }
            SignatureShape::VoidLong => CallSignature::new(vec![], vec![Long]),
            SignatureShape::L2F => CallSignature::new(vec![Long], vec![Float]),
            SignatureShape::UpdateBytesCrc32 => {
                CallSignature::new(vec![Int, Ptr, Int], vec![Int])
            }
            SignatureShape::StringIndexOf => {
                CallSignature::new(vec![Ptr, Int, Ptr, Int], vec![Int])
            }
            SignatureShape::Digest(variant) => {
                let mut domain = vec![Ptr, Ptr];
                if variant == DigestVariant::Sha3 {
                    domain.push(Int);
                }
                CallSignature::new(domain, vec![])
            }
            SignatureShape::NotifyTask => CallSignature::new(vec![Ref, Int], vec![]),
        }
    }
}

/// Ordered domain and range value kinds of a stub call
#[derive(Debug, PartialEq, Eq)]
pub struct CallSignature {
    domain: Vec<ValueKind>,
    range: Vec<ValueKind>,
}

impl CallSignature {
    /// Create a signature from its domain and range
    pub fn new(domain: Vec<ValueKind>, range: Vec<ValueKind>) -> Self {
        CallSignature { domain, range }
    }

    /// Argument kinds, in the order compiled code passes them
    pub fn domain(&self) -> &[ValueKind] {
        &self.domain
    }

    /// Result kinds
    pub fn range(&self) -> &[ValueKind] {
        &self.range
    }

    /// The single result kind, if the call returns a value
    pub fn result(&self) -> Option<ValueKind> {
        self.range.first().copied()
    }

    /// Stack slots the domain occupies in the compiled convention
    pub fn argument_slots(&self) -> u32 {
        self.domain.iter().map(|k| k.slot_count()).sum()
    }

    /// Positions of managed references among the arguments
    pub fn reference_arguments(&self) -> impl Iterator<Item = usize> + '_ {
        self.domain
            .iter()
            .enumerate()
            .filter(|(_, k)| k.is_reference())
            .map(|(i, _)| i)
    }
}

impl std::fmt::Display for CallSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, kind) in self.domain.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", kind)?;
        }
        write!(f, ") -> ")?;
        match self.range.as_slice() {
            [] => write!(f, "void"),
            [single] => write!(f, "{}", single),
            many => {
                write!(f, "(")?;
                for (i, kind) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", kind)?;
                }
                write!(f, ")")
            }
        }
    }
}

static GLOBAL_REGISTRY: Lazy<SignatureRegistry> = Lazy::new(SignatureRegistry::new);

/// Memoizing producer of stub signatures
pub struct SignatureRegistry {
    /// Shape -> the one signature built for it
    cache: Mutex<FxHashMap<SignatureShape, Arc<CallSignature>>>,
    /// Number of signatures ever constructed
    constructed: AtomicUsize,
}

impl SignatureRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        SignatureRegistry {
            cache: Mutex::new(FxHashMap::default()),
            constructed: AtomicUsize::new(0),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static SignatureRegistry {
        &GLOBAL_REGISTRY
    }

    /// Signature of a catalog stub
    pub fn signature(&self, id: StubId) -> Arc<CallSignature> {
        // Catalog shapes are checked by `validate_catalog`
        self.get_or_build(id.info().shape)
    }

    /// Signature for an arbitrary shape, validating its parameters first
    pub fn shape(&self, shape: SignatureShape) -> Result<Arc<CallSignature>, SignatureRangeError> {
        shape.validate()?;
        Ok(self.get_or_build(shape))
    }

    /// Multi-dimensional allocation signature for `ndim` dimensions
    pub fn multi_new_array(&self, ndim: u32) -> Result<Arc<CallSignature>, SignatureRangeError> {
        self.shape(SignatureShape::MultiNewArray(ndim))
    }

    /// Vector math signature for `num_args` operands of shape `input`
    pub fn vector_math(
        &self,
        num_args: u32,
        input: VectorKind,
        output: VectorKind,
    ) -> Result<Arc<CallSignature>, SignatureRangeError> {
        self.shape(SignatureShape::VectorMath { num_args, input, output })
    }

    /// Digest compression signature for a hash family
    pub fn digest_compress(&self, variant: DigestVariant) -> Arc<CallSignature> {
        self.get_or_build(SignatureShape::Digest(variant))
    }

    /// How many signatures this registry has constructed
    pub fn constructed_count(&self) -> usize {
        self.constructed.load(Ordering::Relaxed)
    }

    fn get_or_build(&self, shape: SignatureShape) -> Arc<CallSignature> {
        // Build under the lock so concurrent first requests construct once
        let mut cache = self.cache.lock();
        cache
            .entry(shape)
            .or_insert_with(|| {
                self.constructed.fetch_add(1, Ordering::Relaxed);
                Arc::new(shape.build())
            })
            .clone()
    }
}

impl Default for SignatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::types::LaneType;

    #[test]
    fn test_new_array_signature() {
        let registry = SignatureRegistry::new();
        let sig = registry.signature(StubId::NewArray);
        assert_eq!(sig.domain(), &[ValueKind::Ref, ValueKind::Int]);
        assert_eq!(sig.range(), &[ValueKind::Ref]);
        assert_eq!(sig.to_string(), "(ref, i32) -> ref");
    }

    #[test]
    fn test_memoized_per_shape() {
        let registry = SignatureRegistry::new();
        let a = registry.signature(StubId::NewArray);
        let b = registry.signature(StubId::NewArray);
        // new_array_nozero shares the shape
        let c = registry.signature(StubId::NewArrayNozero);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(registry.constructed_count(), 1);
    }

    #[test]
    fn test_multi_new_array_per_dimension() {
        let registry = SignatureRegistry::new();
        let two = registry.multi_new_array(2).unwrap();
        let three = registry.multi_new_array(3).unwrap();
        assert_eq!(two.domain().len(), 3);
        assert_eq!(three.domain().len(), 4);
        assert!(!Arc::ptr_eq(&two, &three));
        assert!(Arc::ptr_eq(&two, &registry.multi_new_array(2).unwrap()));
        assert!(Arc::ptr_eq(&two, &registry.signature(StubId::MultiNewArray2)));
        assert_eq!(registry.constructed_count(), 2);
    }

    #[test]
    fn test_multi_new_array_range() {
        let registry = SignatureRegistry::new();
        assert_eq!(
            registry.multi_new_array(1).unwrap_err(),
            SignatureRangeError::Dimensions(1)
        );
        assert_eq!(
            registry.multi_new_array(6).unwrap_err(),
            SignatureRangeError::Dimensions(6)
        );
        // Rejected tuples never reach construction
        assert_eq!(registry.constructed_count(), 0);
    }

    #[test]
    fn test_vector_math_signatures() {
        let registry = SignatureRegistry::new();
        let f64x4 = VectorKind::new(LaneType::F64, 4);
        let f64x2 = VectorKind::new(LaneType::F64, 2);

        let binary = registry.vector_math(2, f64x4, f64x4).unwrap();
        assert_eq!(binary.domain(), &[ValueKind::Vector(f64x4), ValueKind::Vector(f64x4)]);
        assert_eq!(binary.range(), &[ValueKind::Vector(f64x4)]);

        let unary = registry.vector_math(1, f64x2, f64x2).unwrap();
        assert_eq!(unary.domain().len(), 1);
        assert!(!Arc::ptr_eq(&binary, &unary));

        assert_eq!(
            registry.vector_math(3, f64x2, f64x2).unwrap_err(),
            SignatureRangeError::VectorArity(3)
        );
        let bad = VectorKind::new(LaneType::F64, 3);
        assert_eq!(
            registry.vector_math(1, bad, f64x2).unwrap_err(),
            SignatureRangeError::VectorShape(bad)
        );
    }

    #[test]
    fn test_digest_variants() {
        let registry = SignatureRegistry::new();
        let sha2 = registry.digest_compress(DigestVariant::Sha256);
        let sha3 = registry.digest_compress(DigestVariant::Sha3);
        assert_eq!(sha2.domain(), &[ValueKind::Ptr, ValueKind::Ptr]);
        assert_eq!(sha3.domain(), &[ValueKind::Ptr, ValueKind::Ptr, ValueKind::Int]);
        assert!(Arc::ptr_eq(&sha2, &registry.signature(StubId::Sha256Compress)));
    }

    #[test]
    fn test_reference_arguments() {
        let registry = SignatureRegistry::new();
        let sig = registry.signature(StubId::SlowArraycopy);
        assert_eq!(sig.reference_arguments().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(sig.argument_slots(), 2 + 1 + 2 + 1 + 1);
        assert_eq!(sig.to_string(), "(ref, i32, ref, i32, i32) -> void");
    }

    #[test]
    fn test_shapes_outside_the_catalog() {
        let registry = SignatureRegistry::new();
        let cases = [
            (SignatureShape::Athrow, "(ref) -> void"),
            (SignatureShape::VoidVoid, "() -> void"),
            (SignatureShape::VoidLong, "() -> i64"),
            (SignatureShape::L2F, "(i64) -> f32"),
        ];
        for (shape, rendered) in cases {
            let sig = registry.shape(shape).unwrap();
            assert_eq!(sig.to_string(), rendered);
            assert!(Arc::ptr_eq(&sig, &registry.shape(shape).unwrap()));
        }
        // equal signatures under different shapes are memoized separately
        assert!(!Arc::ptr_eq(
            &registry.shape(SignatureShape::VoidVoid).unwrap(),
            &registry.signature(StubId::ThrowNullException)
        ));
        assert_eq!(registry.constructed_count(), 5);
    }

    #[test]
    fn test_every_catalog_stub_has_a_signature() {
        let registry = SignatureRegistry::new();
        for &id in StubId::all() {
            let sig = registry.signature(id);
            assert!(sig.range().len() <= 1, "{} returns more than one value", id);
        }
    }

    #[test]
    fn test_concurrent_requests_construct_once() {
        let registry = SignatureRegistry::new();
        let sigs: Vec<Arc<CallSignature>> = crossbeam::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|_| registry.multi_new_array(4).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();

        assert_eq!(registry.constructed_count(), 1);
        for sig in &sigs[1..] {
            assert!(Arc::ptr_eq(&sigs[0], sig));
        }
    }
}
