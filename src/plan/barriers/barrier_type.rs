//! Encoding of barrier kinds and the operands a barrier set publishes to code generators.
//!
//! A barrier type is a byte: `(discriminator << 2) | (position << 1) | action`. The low
//! two bits say whether the barrier runs before or after the access and whether it guards
//! a write or a read; the discriminator names the barrier algorithm. Discriminator 1 is
//! reserved for "no barrier".

use crate::util::{Address, ObjectReference};
use strum_macros::{Display, EnumString};

pub const BARRIER_POSITION_PRE: u8 = 1;
pub const BARRIER_POSITION_POST: u8 = 0;
pub const BARRIER_ACTION_WRITE: u8 = 1;
pub const BARRIER_ACTION_READ: u8 = 0;

const POSITION_MASK: u8 = 0b10;
const ACTION_MASK: u8 = 0b01;
const NONE_DISCRIMINATOR: u8 = 1;

pub const fn encode_barrier_type(value: u8, position: u8, action: u8) -> u8 {
    (value << 2) | (position << 1) | action
}

pub const fn is_pre_barrier(raw: u8) -> bool {
    raw & POSITION_MASK != 0
}

pub const fn is_post_barrier(raw: u8) -> bool {
    raw & POSITION_MASK == 0
}

pub const fn is_write_barrier(raw: u8) -> bool {
    raw & ACTION_MASK != 0
}

pub const fn is_read_barrier(raw: u8) -> bool {
    raw & ACTION_MASK == 0
}

pub const fn is_empty_barrier(raw: u8) -> bool {
    raw >> 2 == NONE_DISCRIMINATOR
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum BarrierType {
    PreWrbNone = encode_barrier_type(NONE_DISCRIMINATOR, BARRIER_POSITION_PRE, BARRIER_ACTION_WRITE),
    PreRbNone = encode_barrier_type(NONE_DISCRIMINATOR, BARRIER_POSITION_PRE, BARRIER_ACTION_READ),
    PostWrbNone = encode_barrier_type(NONE_DISCRIMINATOR, BARRIER_POSITION_POST, BARRIER_ACTION_WRITE),
    PostRbNone = encode_barrier_type(NONE_DISCRIMINATOR, BARRIER_POSITION_POST, BARRIER_ACTION_READ),
    /// Snapshot-at-the-beginning: record the overwritten value while marking runs.
    PreSatbBarrier = encode_barrier_type(2, BARRIER_POSITION_PRE, BARRIER_ACTION_WRITE),
    /// Dirty the card of every object written to.
    PostIntergenerationalBarrier = encode_barrier_type(3, BARRIER_POSITION_POST, BARRIER_ACTION_WRITE),
    /// Dirty and enqueue the card of objects that get a cross-region reference.
    PostInterregionBarrier = encode_barrier_type(4, BARRIER_POSITION_POST, BARRIER_ACTION_WRITE),
}

impl BarrierType {
    pub const fn raw(self) -> u8 {
        self as u8
    }

    pub const fn is_pre_barrier(self) -> bool {
        is_pre_barrier(self.raw())
    }

    pub const fn is_post_barrier(self) -> bool {
        is_post_barrier(self.raw())
    }

    pub const fn is_write_barrier(self) -> bool {
        is_write_barrier(self.raw())
    }

    pub const fn is_read_barrier(self) -> bool {
        is_read_barrier(self.raw())
    }

    pub const fn is_empty_barrier(self) -> bool {
        is_empty_barrier(self.raw())
    }
}

/// What kind of value an operand carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BarrierOperandType {
    AddressType,
    PreWriteBarrierFuncAddress,
    Uint8Address,
    FuncWithObjRefAddress,
    Uint8Type,
    FuncWithTwoObjRefAddresses,
}

pub type PreWriteBarrierFn = fn(ObjectReference);
pub type ObjRefFn = fn(ObjectReference);
pub type TwoObjRefFn = fn(ObjectReference, ObjectReference);

#[derive(Copy, Clone, Debug)]
pub enum BarrierOperandValue {
    Address(Address),
    PreWriteBarrierFunc(PreWriteBarrierFn),
    Uint8Address(Address),
    FuncWithObjRef(ObjRefFn),
    Uint8(u8),
    FuncWithTwoObjRefs(TwoObjRefFn),
}

impl BarrierOperandValue {
    pub fn operand_type(&self) -> BarrierOperandType {
        match self {
            BarrierOperandValue::Address(_) => BarrierOperandType::AddressType,
            BarrierOperandValue::PreWriteBarrierFunc(_) => BarrierOperandType::PreWriteBarrierFuncAddress,
            BarrierOperandValue::Uint8Address(_) => BarrierOperandType::Uint8Address,
            BarrierOperandValue::FuncWithObjRef(_) => BarrierOperandType::FuncWithObjRefAddress,
            BarrierOperandValue::Uint8(_) => BarrierOperandType::Uint8Type,
            BarrierOperandValue::FuncWithTwoObjRefs(_) => BarrierOperandType::FuncWithTwoObjRefAddresses,
        }
    }
}

/// A typed value a compiled barrier needs at run time.
#[derive(Copy, Clone, Debug)]
pub struct BarrierOperand {
    ty: BarrierOperandType,
    value: BarrierOperandValue,
}

impl BarrierOperand {
    pub fn new(ty: BarrierOperandType, value: BarrierOperandValue) -> Self {
        assert_eq!(
            value.operand_type(),
            ty,
            "operand value {:?} does not match type {:?}",
            value,
            ty
        );
        BarrierOperand { ty, value }
    }

    pub fn get_type(&self) -> BarrierOperandType {
        self.ty
    }

    pub fn get_value(&self) -> BarrierOperandValue {
        self.value
    }

    pub fn as_address(&self) -> Option<Address> {
        match self.value {
            BarrierOperandValue::Address(a) | BarrierOperandValue::Uint8Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self.value {
            BarrierOperandValue::Uint8(v) => Some(v),
            _ => None,
        }
    }
}

/// Names of the operands barrier sets publish.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumString, Display)]
pub enum BarrierOperandName {
    /// Lowest heap address covered by the card table.
    MinAddr,
    /// Address of card 0.
    CardTableAddr,
    /// log2 of the bytes covered by one card.
    CardBits,
    /// Value stored into a dirty card.
    DirtyVal,
    /// log2 of the region size.
    RegionSizeBits,
    /// The pre-write barrier slow path.
    PreWrbEntrypoint,
    /// The post-write barrier slow path.
    UpdateCard,
}

/// Runtime slow paths a code generator may call from compiled barriers.
#[derive(Copy, Clone, Debug)]
pub struct BarrierEntrypoints {
    pub pre_write: PreWriteBarrierFn,
    pub update_card: TwoObjRefFn,
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! test_barrier_type {
        ($name: ident, $pre: expr, $write: expr, $empty: expr) => {
            paste::paste! {
                #[test]
                fn [<decode_ $name:snake>]() {
                    let t = BarrierType::$name;
                    assert_eq!(t.is_pre_barrier(), $pre);
                    assert_eq!(t.is_post_barrier(), !$pre);
                    assert_eq!(t.is_write_barrier(), $write);
                    assert_eq!(t.is_read_barrier(), !$write);
                    assert_eq!(t.is_empty_barrier(), $empty);
                }
            }
        };
    }

    test_barrier_type!(PreWrbNone, true, true, true);
    test_barrier_type!(PreRbNone, true, false, true);
    test_barrier_type!(PostWrbNone, false, true, true);
    test_barrier_type!(PostRbNone, false, false, true);
    test_barrier_type!(PreSatbBarrier, true, true, false);
    test_barrier_type!(PostIntergenerationalBarrier, false, true, false);
    test_barrier_type!(PostInterregionBarrier, false, true, false);

    #[test]
    fn encoding_inverts_for_all_triples() {
        for value in 1..64u8 {
            for position in [BARRIER_POSITION_PRE, BARRIER_POSITION_POST] {
                for action in [BARRIER_ACTION_WRITE, BARRIER_ACTION_READ] {
                    let raw = encode_barrier_type(value, position, action);
                    assert_eq!(is_pre_barrier(raw), position == BARRIER_POSITION_PRE);
                    assert_eq!(is_post_barrier(raw), position == BARRIER_POSITION_POST);
                    assert_eq!(is_write_barrier(raw), action == BARRIER_ACTION_WRITE);
                    assert_eq!(is_read_barrier(raw), action == BARRIER_ACTION_READ);
                    assert_eq!(is_empty_barrier(raw), value == 1);
                }
            }
        }
    }

    #[test]
    fn constants() {
        assert_eq!(BarrierType::PreSatbBarrier.raw(), 0b1011);
        assert_eq!(BarrierType::PostIntergenerationalBarrier.raw(), 0b1101);
        assert_eq!(BarrierType::PostInterregionBarrier.raw(), 0b10001);
    }

    #[test]
    fn operand_type_matches_value() {
        let op = BarrierOperand::new(BarrierOperandType::Uint8Type, BarrierOperandValue::Uint8(9));
        assert_eq!(op.get_type(), BarrierOperandType::Uint8Type);
        assert_eq!(op.as_u8(), Some(9));
        assert_eq!(op.as_address(), None);
    }

    #[test]
    #[should_panic]
    fn operand_type_mismatch() {
        BarrierOperand::new(BarrierOperandType::AddressType, BarrierOperandValue::Uint8(9));
    }

    #[test]
    fn operand_names() {
        assert_eq!("CardTableAddr".parse::<BarrierOperandName>(), Ok(BarrierOperandName::CardTableAddr));
        assert_eq!(BarrierOperandName::RegionSizeBits.to_string(), "RegionSizeBits");
        assert!("NoSuchOperand".parse::<BarrierOperandName>().is_err());
    }
}
