#![forbid(unsafe_code)]

//! Packed binding flags.
//!
//! Every hot-path call in the binding engine (`bind`, `unbind`, `connect`,
//! change notification, evaluation) carries a [`BindingFlags`] value. The
//! value is a single `u32` split into disjoint bit ranges:
//!
//! | Field | Bits | Meaning |
//! |-------|------|---------|
//! | `ID` | 0..=20 | Identifier of the binding/observer that produced the flags |
//! | `MODE` | 21..=22 | [`BindingMode`] |
//! | `ORIGIN` | 23..=24 | [`BindingOrigin`] |
//! | `DIRECTION` | 25..=26 | [`BindingDirection`] |
//! | `OPERATION` | 27..=29 | [`BindingOperation`] |
//! | `MUST_EVALUATE` | 30 | Force re-evaluation regardless of cached state |
//!
//! # Invariants
//!
//! 1. Fields never overlap; every field is read through its mask.
//! 2. `BindingMode::ToView` and the legacy "one way" mode share a bit pattern.
//! 3. Identifiers are never zero, so a non-empty `ID` field always names an
//!    origin.
//!
//! Bindings precompute the flags they pass on bind/unbind/connect/update in a
//! [`BindingFlagSet`] so no bit arithmetic happens per notification.

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Packed flags passed along every binding-engine operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindingFlags: u32 {
        /// Identifier field mask.
        const ID = (1 << 21) - 1;
        /// Binding mode field mask.
        const MODE = 0b11 << 21;
        /// Origin field mask.
        const ORIGIN = 0b11 << 23;
        /// Direction field mask.
        const DIRECTION = 0b11 << 25;
        /// Operation field mask.
        const OPERATION = 0b111 << 27;
        /// Sentinel forcing re-evaluation.
        const MUST_EVALUATE = 1 << 30;
    }
}

const MODE_SHIFT: u32 = 21;
const ORIGIN_SHIFT: u32 = 23;
const DIRECTION_SHIFT: u32 = 25;
const OPERATION_SHIFT: u32 = 27;

/// Global counter for binding/observer identifiers.
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifier stored in the `ID` field of [`BindingFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u32);

impl BindingId {
    /// Allocate the next identifier.
    ///
    /// Identifiers wrap around inside the 21-bit field and skip zero.
    #[must_use]
    pub fn next() -> Self {
        loop {
            let raw = NEXT_ID.fetch_add(1, Ordering::Relaxed) & BindingFlags::ID.bits();
            if raw != 0 {
                return Self(raw);
            }
        }
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction(s) in which a binding propagates values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BindingMode {
    /// Evaluate once on bind; never observe.
    OneTime,
    /// Source to target, continuously. Also known as "one way".
    #[default]
    ToView,
    /// Target to source, continuously.
    FromView,
    /// Both directions.
    TwoWay,
}

impl BindingMode {
    /// Legacy name for [`BindingMode::ToView`].
    pub const ONE_WAY: Self = Self::ToView;

    /// Bits of this mode inside the `MODE` field.
    #[must_use]
    pub const fn bits(self) -> u32 {
        let raw = match self {
            Self::OneTime => 0,
            Self::ToView => 0b01,
            Self::FromView => 0b10,
            Self::TwoWay => 0b11,
        };
        raw << MODE_SHIFT
    }

    /// Extract the mode field from packed flags.
    #[must_use]
    pub const fn from_flags(flags: BindingFlags) -> Self {
        match (flags.bits() & BindingFlags::MODE.bits()) >> MODE_SHIFT {
            0b01 => Self::ToView,
            0b10 => Self::FromView,
            0b11 => Self::TwoWay,
            _ => Self::OneTime,
        }
    }

    /// Whether the target is written from the source.
    #[must_use]
    pub const fn updates_target(self) -> bool {
        !matches!(self, Self::FromView)
    }

    /// Whether the source is written from the target.
    #[must_use]
    pub const fn updates_source(self) -> bool {
        matches!(self, Self::FromView | Self::TwoWay)
    }

    /// Whether the binding keeps source subscriptions after bind.
    #[must_use]
    pub const fn observes_source(self) -> bool {
        matches!(self, Self::ToView | Self::TwoWay)
    }
}

/// Who produced a flags value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BindingOrigin {
    #[default]
    Unknown,
    Component,
    Binding,
    Observer,
}

impl BindingOrigin {
    #[must_use]
    pub const fn bits(self) -> u32 {
        let raw = match self {
            Self::Unknown => 0,
            Self::Component => 0b01,
            Self::Binding => 0b10,
            Self::Observer => 0b11,
        };
        raw << ORIGIN_SHIFT
    }

    #[must_use]
    pub const fn from_flags(flags: BindingFlags) -> Self {
        match (flags.bits() & BindingFlags::ORIGIN.bits()) >> ORIGIN_SHIFT {
            0b01 => Self::Component,
            0b10 => Self::Binding,
            0b11 => Self::Observer,
            _ => Self::Unknown,
        }
    }
}

/// Which way data is currently flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BindingDirection {
    #[default]
    Unknown,
    ToView,
    FromView,
}

impl BindingDirection {
    #[must_use]
    pub const fn bits(self) -> u32 {
        let raw = match self {
            Self::Unknown => 0,
            Self::ToView => 0b01,
            Self::FromView => 0b10,
        };
        raw << DIRECTION_SHIFT
    }

    #[must_use]
    pub const fn from_flags(flags: BindingFlags) -> Self {
        match (flags.bits() & BindingFlags::DIRECTION.bits()) >> DIRECTION_SHIFT {
            0b01 => Self::ToView,
            0b10 => Self::FromView,
            _ => Self::Unknown,
        }
    }
}

/// What caused a value to be recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BindingOperation {
    #[default]
    Unknown,
    Bind,
    Unbind,
    Connect,
    Change,
    Call,
    Event,
}

impl BindingOperation {
    #[must_use]
    pub const fn bits(self) -> u32 {
        let raw = match self {
            Self::Unknown => 0,
            Self::Bind => 0b001,
            Self::Unbind => 0b010,
            Self::Connect => 0b011,
            Self::Change => 0b100,
            Self::Call => 0b101,
            Self::Event => 0b110,
        };
        raw << OPERATION_SHIFT
    }

    #[must_use]
    pub const fn from_flags(flags: BindingFlags) -> Self {
        match (flags.bits() & BindingFlags::OPERATION.bits()) >> OPERATION_SHIFT {
            0b001 => Self::Bind,
            0b010 => Self::Unbind,
            0b011 => Self::Connect,
            0b100 => Self::Change,
            0b101 => Self::Call,
            0b110 => Self::Event,
            _ => Self::Unknown,
        }
    }
}

impl BindingFlags {
    /// Tag flags with an origin identifier.
    #[must_use]
    pub const fn from_id(id: BindingId) -> Self {
        Self::from_bits_retain(id.get())
    }

    /// Identifier field, if set.
    #[must_use]
    pub const fn id(self) -> Option<BindingId> {
        match self.bits() & Self::ID.bits() {
            0 => None,
            raw => Some(BindingId(raw)),
        }
    }

    #[must_use]
    pub const fn mode(self) -> BindingMode {
        BindingMode::from_flags(self)
    }

    #[must_use]
    pub const fn origin(self) -> BindingOrigin {
        BindingOrigin::from_flags(self)
    }

    #[must_use]
    pub const fn direction(self) -> BindingDirection {
        BindingDirection::from_flags(self)
    }

    #[must_use]
    pub const fn operation(self) -> BindingOperation {
        BindingOperation::from_flags(self)
    }

    #[must_use]
    pub const fn must_evaluate(self) -> bool {
        self.bits() & Self::MUST_EVALUATE.bits() != 0
    }

    #[must_use]
    pub const fn with_mode(self, mode: BindingMode) -> Self {
        Self::from_bits_retain((self.bits() & !Self::MODE.bits()) | mode.bits())
    }

    #[must_use]
    pub const fn with_origin(self, origin: BindingOrigin) -> Self {
        Self::from_bits_retain((self.bits() & !Self::ORIGIN.bits()) | origin.bits())
    }

    #[must_use]
    pub const fn with_direction(self, direction: BindingDirection) -> Self {
        Self::from_bits_retain((self.bits() & !Self::DIRECTION.bits()) | direction.bits())
    }

    #[must_use]
    pub const fn with_operation(self, operation: BindingOperation) -> Self {
        Self::from_bits_retain((self.bits() & !Self::OPERATION.bits()) | operation.bits())
    }

    /// `self` unless it is empty, in which case `default`.
    ///
    /// Callers pass `BindingFlags::empty()` to mean "use your own flags".
    #[must_use]
    pub const fn fallback(self, default: Self) -> Self {
        if self.is_empty() { default } else { self }
    }
}

/// Flag combinations a binding or observer passes on each of its operations.
///
/// Computed once per instance (and again only when the mode changes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingFlagSet {
    pub bind: BindingFlags,
    pub unbind: BindingFlags,
    pub connect: BindingFlags,
    pub update_source: BindingFlags,
    pub update_target: BindingFlags,
    pub call_source: BindingFlags,
    pub handle_event: BindingFlags,
}

impl BindingFlagSet {
    /// Precompute flags for an instance with the given identity.
    #[must_use]
    pub const fn new(id: BindingId, origin: BindingOrigin, mode: BindingMode) -> Self {
        let base = BindingFlags::from_id(id).with_origin(origin).with_mode(mode);
        Self {
            bind: base.with_operation(BindingOperation::Bind),
            unbind: base.with_operation(BindingOperation::Unbind),
            connect: base.with_operation(BindingOperation::Connect),
            update_source: base
                .with_operation(BindingOperation::Change)
                .with_direction(BindingDirection::FromView),
            update_target: base
                .with_operation(BindingOperation::Change)
                .with_direction(BindingDirection::ToView),
            call_source: base
                .with_operation(BindingOperation::Call)
                .with_direction(BindingDirection::FromView),
            handle_event: base.with_operation(BindingOperation::Event),
        }
    }
}
