//! Mutable IR traversal.

use crate::plan_at::PlanAtMut;
use crate::{BasicBlock, BlockContents, CfgNode, Inst, Plan, Recipe, Region, Value};
use std::cmp::Ordering;

/// The result of a transformation (which is not in-place).
#[must_use]
#[derive(Copy, Clone)]
pub enum Transformed<T> {
    /// The original `T` value remains as it was, at no cost.
    Unchanged,

    /// Some part of the original `T` value was transformed, and a new `T` value
    /// had to be constructed. This change will propagate in any "outer" value.
    Changed(T),
}

impl<T> Transformed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Transformed<U> {
        match self {
            Transformed::Unchanged => Transformed::Unchanged,
            Transformed::Changed(new) => Transformed::Changed(f(new)),
        }
    }

    pub fn apply_to(self, dest: &mut T) {
        match self {
            Transformed::Unchanged => {}
            Transformed::Changed(new) => *dest = new,
        }
    }
}

// HACK(eddyb) the `Self` type here doesn't matter, it only exists so that we
// can call e.g. `Transformed::foo(...)` methods.
impl Transformed<()> {
    /// Map every element of an iterator through `transform_elem` and return
    /// [`Transformed::Changed(new_iter)`] if any `transform_elem` call returned
    /// [`Transformed::Changed`], with `new_iter` containing a combination of the
    /// changed elements, and clones of the unchanged elements.
    pub fn map_iter<'a, T: 'a + Clone>(
        iter: impl Iterator<Item = &'a T> + Clone + 'a,
        mut transform_elem: impl FnMut(&'a T) -> Transformed<T> + 'a,
    ) -> Transformed<impl Iterator<Item = T> + 'a> {
        for (i, elem_i) in iter.clone().enumerate() {
            if let Transformed::Changed(new_elem_i) = transform_elem(elem_i) {
                let mut new_elem_i = Some(new_elem_i);
                return Transformed::Changed(iter.enumerate().map(move |(j, elem_j)| {
                    match j.cmp(&i) {
                        // Earlier elements, already known to be `Unchanged`.
                        Ordering::Less => elem_j.clone(),

                        // The first `Changed` element (only ever taken once).
                        Ordering::Equal => new_elem_i.take().unwrap_or_else(|| elem_j.clone()),

                        // Later elements, only now being transformed.
                        Ordering::Greater => match transform_elem(elem_j) {
                            Transformed::Unchanged => elem_j.clone(),
                            Transformed::Changed(new_elem_j) => new_elem_j,
                        },
                    }
                }));
            }
        }
        Transformed::Unchanged
    }
}

// FIXME(eddyb) `Sized` bound shouldn't be needed but removing it requires
// writing `impl Transformer + ?Sized` in `fn inner_transform_with` signatures.
pub trait Transformer: Sized {
    // Leaves (noop default behavior).
    fn transform_value_use(&mut self, _v: &Value) -> Transformed<Value> {
        Transformed::Unchanged
    }

    /// Transform the condition bit of `bb` (defaults to a plain use).
    fn transform_cond_bit_use(&mut self, _bb: BasicBlock, v: &Value) -> Transformed<Value> {
        self.transform_value_use(v)
    }

    // Non-leaves transformed in-place (defaulting to calling
    // `.inner_in_place_transform_with(self)`).
    fn in_place_transform_plan(&mut self, plan: &mut Plan) {
        plan.inner_in_place_transform_with(self);
    }
    fn in_place_transform_region_def(&mut self, mut plan_at_region: PlanAtMut<'_, Region>) {
        plan_at_region.inner_in_place_transform_with(self);
    }
    fn in_place_transform_basic_block_def(&mut self, mut plan_at_bb: PlanAtMut<'_, BasicBlock>) {
        plan_at_bb.inner_in_place_transform_with(self);
    }
    fn in_place_transform_inst_def(&mut self, mut plan_at_inst: PlanAtMut<'_, Inst>) {
        plan_at_inst.inner_in_place_transform_with(self);
    }
    fn in_place_transform_recipe_def(&mut self, mut plan_at_recipe: PlanAtMut<'_, Recipe>) {
        plan_at_recipe.inner_in_place_transform_with(self);
    }
}

/// Trait implemented on "transformable" types, to further "elaborate" a type by
/// transforming its "interior" (i.e. variants and/or fields), in place.
///
/// That is, an `impl InnerInPlaceTransform for X` will call the relevant
/// [`Transformer`] method for each `X` field, effectively performing a single
/// level of a deep transform.
pub trait InnerInPlaceTransform {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer);
}

impl InnerInPlaceTransform for Plan {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        if let Some(entry) = self.entry {
            self.at_mut(entry).inner_in_place_transform_with(transformer);
        }
    }
}

impl InnerInPlaceTransform for PlanAtMut<'_, CfgNode> {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        match self.position {
            CfgNode::BasicBlock(bb) => {
                transformer.in_place_transform_basic_block_def(self.reborrow().at(bb));
            }
            CfgNode::Region(region) => {
                transformer.in_place_transform_region_def(self.reborrow().at(region));
            }
        }
    }
}

impl InnerInPlaceTransform for PlanAtMut<'_, Region> {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        // HACK(eddyb) cloned to allow mutably borrowing the children.
        let children = self.reborrow().def().children.clone();
        for child in children {
            self.reborrow().at(child).inner_in_place_transform_with(transformer);
        }
    }
}

impl InnerInPlaceTransform for PlanAtMut<'_, BasicBlock> {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        let bb = self.position;

        // HACK(eddyb) cloned to allow mutably borrowing the elements.
        let contents = self.reborrow().def().contents.clone();
        match &contents {
            BlockContents::Insts(insts) => {
                for &inst in insts {
                    transformer.in_place_transform_inst_def(self.reborrow().at(inst));
                }
            }
            BlockContents::Recipes(recipes) => {
                for &recipe in recipes {
                    transformer.in_place_transform_recipe_def(self.reborrow().at(recipe));
                }
            }
        }

        // NOTE(eddyb) see also `visit` for detached instructions.
        let detached = self.reborrow().def().detached.clone();
        for inst in detached {
            transformer.in_place_transform_inst_def(self.reborrow().at(inst));
        }

        let cond_bit = self.reborrow().def().cond_bit;
        if let Some(cond_bit) = cond_bit {
            if let Transformed::Changed(new_cond_bit) =
                transformer.transform_cond_bit_use(bb, &cond_bit)
            {
                self.reborrow().def().cond_bit = Some(new_cond_bit);
            }
        }
    }
}

impl InnerInPlaceTransform for PlanAtMut<'_, Inst> {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        let operands = &mut self.reborrow().def().operands;
        Transformed::map_iter(operands.iter(), |v| transformer.transform_value_use(v))
            .map(|new_iter| new_iter.collect())
            .apply_to(operands);
    }
}

impl InnerInPlaceTransform for PlanAtMut<'_, Recipe> {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        let operands = &mut self.reborrow().def().operands;
        Transformed::map_iter(operands.iter(), |v| transformer.transform_value_use(v))
            .map(|new_iter| new_iter.collect())
            .apply_to(operands);
    }
}
