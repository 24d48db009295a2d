//! Conversion planning between slots.
//!
//! [`plan`] classifies a `(source, destination)` pair of [`Slot`]s into one
//! [`Conversion`] with an exactness cost, and [`emit_load_as`] emits the instruction
//! sequence for it. Both walk the same match, so whatever [`can_load_as`] accepts,
//! [`emit_load_as`] can emit.
//!
//! # Precedence
//!
//! The first matching rule wins:
//!
//! | Source | Destination | Conversion | Exactness |
//! |--------|-------------|------------|-----------|
//! | pointer, or `ref void` | any | unsupported | |
//! | any | pointer, or `ref void` | unsupported | |
//! | `void` | `void` | [`Conversion::Identity`] | 0 |
//! | any | `void` | [`Conversion::Discard`] | 10 |
//! | `void` | any | [`Conversion::Fabricate`] | 10 |
//! | `T` | `T`, same access | [`Conversion::Identity`] | 0 |
//! | any | `object` | [`Conversion::ToObject`] | 5 |
//! | `object` | concrete `T` | [`Conversion::FromObject`] | 5 |
//! | `T` | `ref T` | [`Conversion::TakeAddress`] | 0 |
//! | `ref T` | `T` | [`Conversion::Dereference`] | 0 |
//! | `A` | `B`, `A` derives from or implements `B` | [`Conversion::Upcast`] | 2 |
//! | `A` | unrelated `B` | illegal | |
//! | anything else | | unsupported | |
//!
//! `in`, `out` and `ref` are all treated as references.

use log::trace;
use strum::Display;

use crate::{
    adapter::slot::{Slot, SlotOrigin},
    assembly::OpCode,
    emit::Emitter,
    Error, Result,
};

/// Exactness of an exact match.
pub const EXACT: u32 = 0;
/// Exactness of an upcast to a base type or interface.
pub const DERIVED: u32 = 2;
/// Exactness of a conversion to or from `object`.
pub const OBJECT: u32 = 5;
/// Exactness of discarding or fabricating a value.
pub const VOID: u32 = 10;

/// Operation that turns a source slot into a destination slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Conversion {
    /// Evaluate the source as is
    #[strum(serialize = "identity")]
    Identity,
    /// Drop the source value
    #[strum(serialize = "discard")]
    Discard,
    /// Synthesize a default destination value
    #[strum(serialize = "fabricate")]
    Fabricate,
    /// Box or pass through as `object`
    #[strum(serialize = "to-object")]
    ToObject,
    /// Unbox or downcast from `object`
    #[strum(serialize = "from-object")]
    FromObject,
    /// Take the address of the source
    #[strum(serialize = "take-address")]
    TakeAddress,
    /// Load through the source reference
    #[strum(serialize = "dereference")]
    Dereference,
    /// Cast to a base type or interface
    #[strum(serialize = "upcast")]
    Upcast,
}

/// A legal conversion and its cost. Lower exactness is a better match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversionPlan {
    /// Ranking cost; only meaningful relative to other candidates
    pub exactness: u32,
    /// The conversion to emit
    pub conversion: Conversion,
}

impl ConversionPlan {
    fn new(conversion: Conversion, exactness: u32) -> Self {
        ConversionPlan {
            exactness,
            conversion,
        }
    }
}

/// Coarse classification of a slot for planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    /// `void` by value
    Void,
    /// `object` by value
    Object,
    /// Any other type by value
    ByValue,
    /// Any type by reference, `ref void` excluded
    ByRef,
}

/// Returns `None` for slots no rule handles.
fn kind(slot: &Slot) -> Option<SlotKind> {
    let ty = slot.value_type();
    if ty.is_pointer() {
        return None;
    }

    match (slot.is_by_ref(), ty.is_void(), ty.is_object()) {
        (true, true, _) => None,
        (true, false, _) => Some(SlotKind::ByRef),
        (false, true, _) => Some(SlotKind::Void),
        (false, false, true) => Some(SlotKind::Object),
        (false, false, false) => Some(SlotKind::ByValue),
    }
}

fn unsupported(source: &Slot, dest: &Slot) -> Error {
    Error::UnsupportedConversion {
        source_slot: source.to_string(),
        target_slot: dest.to_string(),
    }
}

fn illegal(source: &Slot, dest: &Slot) -> Error {
    Error::IllegalConversion {
        source_slot: source.to_string(),
        target_slot: dest.to_string(),
    }
}

/// Classifies the conversion from `source` to `dest`.
///
/// # Errors
///
/// Returns [`Error::UnsupportedConversion`] for pairings with no rule (pointers,
/// reference crossings between different types) and [`Error::IllegalConversion`] for
/// by-value types with no inheritance relationship.
pub fn plan(source: &Slot, dest: &Slot) -> Result<ConversionPlan> {
    let (Some(from), Some(to)) = (kind(source), kind(dest)) else {
        return Err(unsupported(source, dest));
    };

    let same_type = source.value_type() == dest.value_type();
    let same_access = source.access().is_by_ref() == dest.access().is_by_ref();

    let planned = match (from, to) {
        (SlotKind::Void, SlotKind::Void) => ConversionPlan::new(Conversion::Identity, EXACT),
        (_, SlotKind::Void) => ConversionPlan::new(Conversion::Discard, VOID),
        (SlotKind::Void, _) => ConversionPlan::new(Conversion::Fabricate, VOID),
        _ if same_type && same_access => ConversionPlan::new(Conversion::Identity, EXACT),
        (_, SlotKind::Object) => ConversionPlan::new(Conversion::ToObject, OBJECT),
        (SlotKind::Object, SlotKind::ByValue | SlotKind::ByRef) if !dest.value_type().is_object() => {
            ConversionPlan::new(Conversion::FromObject, OBJECT)
        }
        (SlotKind::ByValue | SlotKind::Object, SlotKind::ByRef) if same_type => {
            ConversionPlan::new(Conversion::TakeAddress, EXACT)
        }
        (SlotKind::ByRef, SlotKind::ByValue) if same_type => {
            ConversionPlan::new(Conversion::Dereference, EXACT)
        }
        (SlotKind::ByValue, SlotKind::ByValue) => {
            if source.value_type().is_assignable_to(dest.value_type()) {
                ConversionPlan::new(Conversion::Upcast, DERIVED)
            } else {
                return Err(illegal(source, dest));
            }
        }
        _ => return Err(unsupported(source, dest)),
    };

    trace!(
        "planned {} -> {}: {} ({})",
        source,
        dest,
        planned.conversion,
        planned.exactness
    );
    Ok(planned)
}

/// Exactness of loading `source` as `dest`.
///
/// # Errors
///
/// Returns the error of [`plan`] if the conversion is not legal.
///
/// ```rust
/// use dotreflect::{prelude::*, adapter::planner};
///
/// let registry = TypeRegistry::new();
/// let int32 = Slot::of_type(&registry.int32(), SlotAccess::Default);
/// let object = Slot::of_type(&registry.object(), SlotAccess::Default);
///
/// assert_eq!(planner::can_load_as(&int32, &int32)?, 0);
/// assert_eq!(planner::can_load_as(&int32, &object)?, 5);
/// # Ok::<(), dotreflect::Error>(())
/// ```
pub fn can_load_as(source: &Slot, dest: &Slot) -> Result<u32> {
    plan(source, dest).map(|planned| planned.exactness)
}

/// Emits the instructions that leave `source` on the stack as `dest`.
///
/// Nothing is left on the stack when `dest` is `void`.
///
/// # Errors
///
/// Returns the error of [`plan`] if the conversion is not legal, or an emitter error.
pub fn emit_load_as(emitter: &mut Emitter<'_>, source: &Slot, dest: &Slot) -> Result<ConversionPlan> {
    let planned = plan(source, dest)?;
    let source_ty = source.value_type();
    let dest_ty = dest.value_type();

    match planned.conversion {
        Conversion::Identity => load_value(emitter, source)?,
        Conversion::Discard => {
            if source.is_pushed() && !source_ty.is_void() {
                emitter.op(OpCode::Pop)?;
            }
        }
        Conversion::Fabricate => {
            if dest.is_by_ref() {
                // locals start zeroed
                let temp = emitter.declare_local(dest_ty)?;
                emitter.ldloca(&temp)?;
            } else {
                emitter.load_default(dest_ty)?;
            }
        }
        Conversion::ToObject => {
            load_value(emitter, source)?;
            if source.is_by_ref() {
                emitter.load_indirect(source_ty)?;
            }
            if source_ty.is_value_type() {
                emitter.box_value(source_ty)?;
            }
        }
        Conversion::FromObject => {
            load_value(emitter, source)?;
            match (dest.is_by_ref(), dest_ty.is_value_type()) {
                (false, true) => emitter.unbox_any(dest_ty)?,
                (false, false) => emitter.castclass(dest_ty)?,
                (true, true) => emitter.unbox(dest_ty)?,
                (true, false) => {
                    emitter.castclass(dest_ty)?;
                    let temp = emitter.declare_local(dest_ty)?;
                    emitter.stloc(&temp)?;
                    emitter.ldloca(&temp)?;
                }
            }
        }
        Conversion::TakeAddress => take_address(emitter, source)?,
        Conversion::Dereference => {
            load_value(emitter, source)?;
            emitter.load_indirect(source_ty)?;
        }
        Conversion::Upcast => {
            load_value(emitter, source)?;
            if source_ty.is_value_type() {
                emitter.box_value(source_ty)?;
            }
            emitter.castclass(dest_ty)?;
        }
    }

    Ok(planned)
}

/// Pushes the physical value of `slot`: the value itself, or its address when by-ref.
fn load_value(emitter: &mut Emitter<'_>, slot: &Slot) -> Result<()> {
    match slot.origin() {
        SlotOrigin::Argument(index) => emitter.ldarg(*index),
        SlotOrigin::Local(local) => emitter.ldloc(local),
        SlotOrigin::Stack => Ok(()),
        SlotOrigin::Type => Err(malformed_error!("Slot '{}' has no value to load", slot)),
    }
}

/// Pushes the address of the by-value `slot`.
fn take_address(emitter: &mut Emitter<'_>, slot: &Slot) -> Result<()> {
    match slot.origin() {
        SlotOrigin::Argument(index) => emitter.ldarga(*index),
        SlotOrigin::Local(local) => emitter.ldloca(local),
        SlotOrigin::Stack => {
            let temp = emitter.declare_local(slot.value_type())?;
            emitter.stloc(&temp)?;
            emitter.ldloca(&temp)
        }
        SlotOrigin::Type => Err(malformed_error!("Slot '{}' has no address to take", slot)),
    }
}
