//! [`Context`] and related types/traits.

use crate::ExternalDef;
use rustc_hash::FxHasher;
use std::cell::Cell;
use std::hash::{BuildHasherDefault, Hash};
use std::num::NonZeroU32;
use std::ops::{Index, IndexMut};

/// Context object with global resources for `vecplan`.
///
/// Those resources currently are:
/// * interners, for anything without an identity, and which can be deduplicated
///   (names, and placeholders for values defined outside of a planned loop)
/// * "entity" allocation, for everything else - i.e. anything with an identity
///   that needs to remain unique across an entire [`Context`]
///   * the *definition* of an entity isn't kept in the [`Context`], but rather in
///     some [`EntityDefs`] collection somewhere in a [`Plan`](crate::Plan)
///
/// Sharing one [`Context`] (through `Rc`) between several [`Plan`](crate::Plan)s
/// keeps their handles disjoint, and their interned placeholders identical.
#[derive(Default)]
pub struct Context {
    interners: Interners,
    next_entity_idx: Cell<u32>,
}

/// Private trait used to implement [`Context::intern`] for each kind of interned
/// type, and also to allow conversions from non-interned types (e.g. `&str`).
pub trait InternInCx<I> {
    #[allow(clippy::wrong_self_convention)]
    fn intern_in_cx(self, cx: &Context) -> I;
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern<T: InternInCx<I>, I>(&self, x: T) -> I {
        x.intern_in_cx(self)
    }

    fn alloc_entity_idx(&self) -> NonZeroU32 {
        let idx = self.next_entity_idx.get().checked_add(1).expect("entity index overflowed");
        self.next_entity_idx.set(idx);
        NonZeroU32::new(idx).unwrap()
    }
}

type FxBuildHasher = BuildHasherDefault<FxHasher>;

#[derive(Default)]
struct Interners {
    strs: elsa::FrozenIndexSet<Box<str>, FxBuildHasher>,
    external_defs: elsa::FrozenIndexSet<Box<ExternalDef>, FxBuildHasher>,
}

/// Interned handle for a [`str`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternedStr(u32);

impl std::fmt::Debug for InternedStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InternedStr({})", self.0)
    }
}

impl InternInCx<InternedStr> for &'_ str {
    fn intern_in_cx(self, cx: &Context) -> InternedStr {
        let (idx, _) = cx.interners.strs.insert_full(self.into());
        InternedStr(idx.try_into().unwrap())
    }
}

impl InternInCx<InternedStr> for String {
    fn intern_in_cx(self, cx: &Context) -> InternedStr {
        let (idx, _) = cx.interners.strs.insert_full(self.into_boxed_str());
        InternedStr(idx.try_into().unwrap())
    }
}

impl Index<InternedStr> for Context {
    type Output = str;

    fn index(&self, interned: InternedStr) -> &str {
        self.interners.strs.get_index(interned.0 as usize).unwrap()
    }
}

/// Interned handle for an [`ExternalDef`] (a value defined outside the loop).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct External(u32);

impl std::fmt::Debug for External {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "External({})", self.0)
    }
}

impl InternInCx<External> for ExternalDef {
    fn intern_in_cx(self, cx: &Context) -> External {
        let (idx, _) = cx.interners.external_defs.insert_full(Box::new(self));
        External(idx.try_into().unwrap())
    }
}

impl Index<External> for Context {
    type Output = ExternalDef;

    fn index(&self, external: External) -> &ExternalDef {
        self.interners.external_defs.get_index(external.0 as usize).unwrap()
    }
}

/// Handle for an entity, i.e. anything with an identity, whose definition is
/// kept in an [`EntityDefs`] (and only reachable through the handle).
pub trait Entity: Copy + Eq + Hash + std::fmt::Debug + 'static {
    type Def;

    #[doc(hidden)]
    fn from_raw_idx(idx: NonZeroU32) -> Self;
}

/// Collection holding the actual definitions for [`Context`]-allocated entities.
///
/// Iteration follows definition order, which keeps every traversal that starts
/// from an [`EntityDefs`] deterministic.
pub struct EntityDefs<E: Entity> {
    defs: indexmap::IndexMap<E, E::Def, FxBuildHasher>,
}

impl<E: Entity> Default for EntityDefs<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> EntityDefs<E> {
    pub fn new() -> Self {
        Self { defs: Default::default() }
    }

    pub fn define(&mut self, cx: &Context, def: E::Def) -> E {
        let entity = E::from_raw_idx(cx.alloc_entity_idx());
        self.defs.insert(entity, def);
        entity
    }

    pub fn get(&self, entity: E) -> Option<&E::Def> {
        self.defs.get(&entity)
    }

    pub fn get_mut(&mut self, entity: E) -> Option<&mut E::Def> {
        self.defs.get_mut(&entity)
    }

    pub fn contains(&self, entity: E) -> bool {
        self.defs.contains_key(&entity)
    }

    /// Remove the definition of `entity`, keeping the relative order of the
    /// remaining definitions.
    pub fn remove(&mut self, entity: E) -> Option<E::Def> {
        self.defs.shift_remove(&entity)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn clear(&mut self) {
        self.defs.clear();
    }

    pub fn keys(&self) -> impl ExactSizeIterator<Item = E> + '_ {
        self.defs.keys().copied()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (E, &E::Def)> + '_ {
        self.defs.iter().map(|(&entity, def)| (entity, def))
    }

    pub fn iter_mut(&mut self) -> impl ExactSizeIterator<Item = (E, &mut E::Def)> + '_ {
        self.defs.iter_mut().map(|(&entity, def)| (entity, def))
    }
}

impl<E: Entity> Index<E> for EntityDefs<E> {
    type Output = E::Def;

    #[track_caller]
    fn index(&self, entity: E) -> &E::Def {
        match self.defs.get(&entity) {
            Some(def) => def,
            None => panic!("EntityDefs: {entity:?} has no definition"),
        }
    }
}

impl<E: Entity> IndexMut<E> for EntityDefs<E> {
    #[track_caller]
    fn index_mut(&mut self, entity: E) -> &mut E::Def {
        match self.defs.get_mut(&entity) {
            Some(def) => def,
            None => panic!("EntityDefs: {entity:?} has no definition"),
        }
    }
}

macro_rules! entities {
    ($($(#[$meta:meta])* $name:ident => $def:ty),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(NonZeroU32);

            impl Entity for $name {
                type Def = $def;

                fn from_raw_idx(idx: NonZeroU32) -> Self {
                    Self(idx)
                }
            }

            impl std::fmt::Debug for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        )+
    };
}

entities! {
    /// Entity handle for a [`BasicBlockDef`](crate::BasicBlockDef).
    BasicBlock => crate::BasicBlockDef,

    /// Entity handle for a [`RegionDef`](crate::RegionDef).
    Region => crate::RegionDef,

    /// Entity handle for an [`InstDef`](crate::InstDef) (a generic instruction).
    Inst => crate::InstDef,

    /// Entity handle for a [`RecipeDef`](crate::RecipeDef) (a lowered instruction).
    Recipe => crate::RecipeDef,
}
