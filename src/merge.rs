//! Merging of sequence fragments into one trajectory.
//!
//! Fragments are concatenated in the order the API returned them, in a
//! single pass. A fragment must pair every image key with one coordinate.
//! The only tolerated mismatch is a known upstream defect where a
//! one-image sequence carries its coordinate twice; that fragment is
//! collapsed to its first coordinate. Any other mismatch aborts the whole
//! merge.

use crate::domain::{Coordinate, MergedTrajectory, SequenceFragment};
use crate::error::MergeError;

pub fn merge_fragments(fragments: &[SequenceFragment]) -> Result<MergedTrajectory, MergeError> {
    let mut merged = MergedTrajectory::default();

    for (index, fragment) in fragments.iter().enumerate() {
        let coordinates = reconcile(index, fragment)?;
        merged.image_keys.extend(fragment.image_keys.iter().cloned());
        merged.coordinates.extend_from_slice(coordinates);
    }

    debug_assert_eq!(merged.image_keys.len(), merged.coordinates.len());
    Ok(merged)
}

/// Returns the coordinates to pair with `fragment.image_keys`.
fn reconcile(index: usize, fragment: &SequenceFragment) -> Result<&[Coordinate], MergeError> {
    let image_keys = fragment.image_keys.len();
    let coordinates = fragment.coordinates.len();
    if image_keys == coordinates {
        return Ok(fragment.coordinates.as_slice());
    }

    if let [first, second] = fragment.coordinates.as_slice() {
        if image_keys == 1 && first == second {
            tracing::warn!(
                fragment = index,
                image_keys,
                coordinates,
                "single image sequence with duplicated coordinate, keeping the first one"
            );
            return Ok(&fragment.coordinates[..1]);
        }
    }

    tracing::debug!(
        fragment = index,
        image_keys,
        coordinates,
        "image keys and coordinates disagree, merge is not possible"
    );
    Err(MergeError::Inconsistent {
        index,
        image_keys,
        coordinates,
    })
}
