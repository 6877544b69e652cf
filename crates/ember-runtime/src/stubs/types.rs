//! Value kinds crossing the compiled/native boundary
//!
//! Compiled code and the runtime agree on values by kind, not by VM type:
//! a managed reference is a 64-bit word the collector must see, a native
//! pointer is an untraced machine address, and so on.

/// Kind of one argument or result of a runtime stub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Managed heap reference (traced by the collector)
    Ref,
    /// 32-bit integer (also booleans, chars, shorts)
    Int,
    /// 64-bit integer
    Long,
    /// Untraced native pointer (lock records, raw buffers, metadata)
    Ptr,
    /// Code address to resume at
    Address,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Machine vector, passed by address of a spilled, aligned buffer
    Vector(VectorKind),
}

impl ValueKind {
    /// Whether the collector must treat a value of this kind as a root
    pub fn is_reference(&self) -> bool {
        matches!(self, ValueKind::Ref)
    }

    /// Whether this kind travels in a floating-point register
    pub fn is_float(&self) -> bool {
        matches!(self, ValueKind::Float | ValueKind::Double)
    }

    /// Stack slots (32-bit units) a value of this kind occupies in the
    /// compiled calling convention
    pub fn slot_count(&self) -> u32 {
        match self {
            ValueKind::Int | ValueKind::Float => 1,
            ValueKind::Ref
            | ValueKind::Long
            | ValueKind::Ptr
            | ValueKind::Address
            | ValueKind::Double
            | ValueKind::Vector(_) => 2,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Ref => write!(f, "ref"),
            ValueKind::Int => write!(f, "i32"),
            ValueKind::Long => write!(f, "i64"),
            ValueKind::Ptr => write!(f, "ptr"),
            ValueKind::Address => write!(f, "addr"),
            ValueKind::Float => write!(f, "f32"),
            ValueKind::Double => write!(f, "f64"),
            ValueKind::Vector(v) => write!(f, "{}", v),
        }
    }
}

/// Element type of a machine vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneType {
    /// 32-bit integer lanes
    I32,
    /// 64-bit integer lanes
    I64,
    /// 32-bit float lanes
    F32,
    /// 64-bit float lanes
    F64,
}

impl LaneType {
    /// Lane width in bits
    pub fn bits(&self) -> u32 {
        match self {
            LaneType::I32 | LaneType::F32 => 32,
            LaneType::I64 | LaneType::F64 => 64,
        }
    }
}

/// Shape of a machine vector: lane type times lane count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorKind {
    /// Element type
    pub lane: LaneType,
    /// Number of lanes
    pub lanes: u8,
}

impl VectorKind {
    /// Create a vector kind
    pub const fn new(lane: LaneType, lanes: u8) -> Self {
        VectorKind { lane, lanes }
    }

    /// Total width in bits
    pub fn bits(&self) -> u32 {
        self.lane.bits() * self.lanes as u32
    }

    /// A legal vector has at least two lanes and a 64/128/256/512-bit width
    pub fn is_legal(&self) -> bool {
        self.lanes >= 2 && matches!(self.bits(), 64 | 128 | 256 | 512)
    }
}

impl std::fmt::Display for VectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lane = match self.lane {
            LaneType::I32 => "i32",
            LaneType::I64 => "i64",
            LaneType::F32 => "f32",
            LaneType::F64 => "f64",
        };
        write!(f, "{}x{}", lane, self.lanes)
    }
}
