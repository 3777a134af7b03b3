//! Deep subtrees over a versioned, AVL-balanced merkle key-value tree.
//!
//! A deep subtree is a *partial* materialization of a full merkle AVL tree:
//! it holds only the nodes needed to recompute the root commitment and to
//! replay a bounded set of mutations against a subset of keys, while
//! producing root hashes byte-identical to the full tree's. Proofs are
//! ingested with [`DeepSubTree::add_existence_proofs`], linked into an
//! in-memory tree with [`DeepSubTree::build_tree`], and mutated with
//! [`DeepSubTree::set`] and [`DeepSubTree::remove`]. The proofs a given
//! mutation needs are decided by the planner on the full [`Tree`], which
//! also serves as the reference the deep subtree is validated against.
//!
//! [`DeepSubTree::add_existence_proofs`]: subtree::DeepSubTree::add_existence_proofs
//! [`DeepSubTree::build_tree`]: subtree::DeepSubTree::build_tree
//! [`DeepSubTree::set`]: subtree::DeepSubTree::set
//! [`DeepSubTree::remove`]: subtree::DeepSubTree::remove
//! [`Tree`]: tree::Tree

pub mod error;
pub mod hash;
pub mod node;
pub mod proof;
pub mod store;
pub mod subtree;
pub mod testing;
pub mod tree;

pub mod prelude {
    pub use digest::Digest;

    pub use crate::{
        error::{Error, Result},
        hash::Hash,
        node::{Child, Node, NodeKind},
        proof::{ExistenceProof, InnerOp, LeafOp, NonExistenceProof},
        store::{MemStore, NodeStore},
        subtree::{DeepSubTree, Operation, WitnessData},
        tree::Tree,
        FromBytes, FromHex, ToBytes, ToHex,
    };
}

use digest::Digest;

use crate::error::Result;

#[doc(hidden)]
/// This is a hidden module to make the macros defined on this crate available for the users.
pub mod __dependencies {
    pub use paste;
    pub use proptest;
}

#[macro_export]
macro_rules! impl_associate_bytes_types {
    ($type:ty) => {
        impl std::hash::Hash for $type {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.to_bytes().hash(state);
            }
        }

        impl $crate::prelude::FromHex for $type {
            fn from_hex(input: &str) -> Result<Self> {
                let bytes = hex::decode(input)?;
                Self::from_bytes(&bytes)
            }
        }

        impl $crate::prelude::ToHex for $type {
            fn to_hex(&self) -> String {
                hex::encode(ToBytes::to_bytes(self))
            }
        }
    };
}

#[macro_export]
macro_rules! test_to_bytes {
    ($type:ty) => {
        $crate::__dependencies::paste::paste! {
            mod [<test_to_bytes_$type:snake>] {
                use $crate::__dependencies::{
                    proptest::prelude::*,
                    proptest,
                };

                use $crate::prelude::*;
                use super::$type;

                $crate::test_to_hex!($type);

                #[test]
                fn test_default_is_zero() {
                    assert!(<$type>::default().is_zero());
                }

                proptest! {
                    #[test]
                    fn test_is_zero_is_same_as_zero_bytes(item: $type) {
                        prop_assert_eq!(
                            item.is_zero(),
                            item.to_bytes() == <$type>::default().to_bytes()
                        );
                    }

                    #[test]
                    fn test_roundtrip(a: $type) {
                        prop_assert_eq!(a.clone(), <$type>::from_bytes(a.to_bytes().as_ref()).unwrap());
                    }

                    #[test]
                    fn test_output_consistency(a: $type) {
                        let decoded = <$type>::from_bytes(a.to_bytes().as_ref()).unwrap();
                        let a_bytes = a.to_bytes();
                        let decoded_bytes = decoded.to_bytes();
                        prop_assert_eq!(a_bytes.as_ref(), decoded_bytes.as_ref());
                    }

                    #[test]
                    fn test_is_different_on_different_objects(a: $type, b: $type) {
                        prop_assert_eq!(a == b, a.to_bytes().as_ref() == b.to_bytes().as_ref());
                    }
                }
            }
        }
    };
}

#[macro_export]
macro_rules! test_to_hex {
    ($type:ty) => {
        $crate::__dependencies::paste::paste! {
            mod [<test_to_hex_$type:snake>] {
                use $crate::__dependencies::{
                    proptest::prelude::*,
                    proptest,
                };

                use $crate::prelude::*;
                use super::$type;

                proptest! {
                    #[test]
                    fn test_roundtrip(a: $type) {
                        prop_assert_eq!(a.clone(), <$type>::from_hex(&a.to_hex()).unwrap());
                    }

                    #[test]
                    fn test_output_consistency(a: $type) {
                        prop_assert_eq!(a.to_hex(), <$type>::from_hex(&a.to_hex()).unwrap().to_hex());
                    }

                    #[test]
                    fn test_is_different_on_different_objects(a: $type, b: $type) {
                        prop_assert_eq!(a == b, a.to_hex() == b.to_hex());
                    }
                }
            }
        }
    };
}

#[macro_export]
macro_rules! prop_assert_changes {
    ($action: expr, $value: expr) => {
        let old_value = $value.clone();

        prop_assert_eq!($value, old_value.clone());

        $action;

        prop_assert_ne!($value, old_value);
    };
}

#[macro_export]
macro_rules! prop_assert_does_not_change {
    ($action: expr, $value: expr) => {
        let old_value = $value.clone();

        $action;

        prop_assert_eq!($value, old_value);
    };
}

pub trait FromBytes
where
    Self: Sized,
{
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

pub trait ToBytes {
    type Output: AsRef<[u8]>;

    /// Converts the value to a representation in bytes.
    fn to_bytes(&self) -> Self::Output;

    /// Converts the value to a representation in bytes, as a vector.
    ///
    /// This is a convenience method, and automatically derived from `to_bytes`.
    fn to_bytes_vec(&self) -> Vec<u8> {
        self.to_bytes().as_ref().to_vec()
    }

    /// Hashes the value using the specified Digest algorithm.
    ///
    /// This is a convenience method, and automatically derived from `to_bytes`.
    fn hash_bytes<D: Digest>(&self) -> crate::hash::Hash {
        crate::hash::Hash::digest::<D>(self.to_bytes().as_ref())
    }

    /// Checks if the value (as bytes) is zero.
    ///
    /// This is useful for checking if a value is empty.
    fn is_zero(&self) -> bool {
        let len = self.to_bytes().as_ref().len();
        self.to_bytes_vec() == vec![0; len]
    }
}

pub trait FromHex
where
    Self: Sized,
{
    fn from_hex(hex: &str) -> Result<Self>;
}

pub trait ToHex {
    fn to_hex(&self) -> String;
}
