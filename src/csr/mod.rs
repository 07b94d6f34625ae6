// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Call set refinement: pluggable per-record measures over facets derived
//! from one batch of calls.

pub mod facets;
pub mod measures;

pub use facets::{Facet, FacetFactory, FacetKind, FacetMap};
pub use measures::{
    AssignedDepth, Depth, GenotypeQuality, Measure, MeasureResult, StrLength,
};
