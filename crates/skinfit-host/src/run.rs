//! One-shot evaluation: gather, solve, write back.

use skinfit_core::error::SkinfitError;
use skinfit_core::store::DataStore;
use skinfit_core::types::{DecompositionInput, DecompositionResult};
use skinfit_solve::decompose;

use crate::export::write_outputs;
use crate::gather::gather_input;
use crate::source::AnimationSource;

/// Run a full decomposition described by `store` over `source` and write the
/// outputs back into `store`.
///
/// Nothing is written when gathering or validation fails. The gathered input
/// is returned alongside the result so callers can export joint curves.
pub fn decompose_store<S, A>(
    store: &mut S,
    source: &A,
) -> Result<(DecompositionInput, DecompositionResult), SkinfitError>
where
    S: DataStore + ?Sized,
    A: AnimationSource + ?Sized,
{
    let (input, config) = gather_input(&*store, source)?;
    let result = decompose(&input, &config)?;
    write_outputs(store, &result);
    Ok((input, result))
}
