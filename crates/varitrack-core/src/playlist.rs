use crate::{source::TrackId, store::TrackHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundaryAvailability {
    pub has_previous: bool,
    pub has_next: bool,
}

/// Adjacent entry of `current` in `list`, without wraparound.
#[must_use]
pub fn resolve<'a>(
    current: &TrackId,
    list: &'a [TrackHandle],
    direction: Direction,
) -> Option<&'a TrackHandle> {
    let index = list.iter().position(|handle| handle.id == *current)?;
    match direction {
        Direction::Previous => index.checked_sub(1).and_then(|previous| list.get(previous)),
        Direction::Next => list.get(index + 1),
    }
}

#[must_use]
pub fn availability(current: &TrackId, list: &[TrackHandle]) -> BoundaryAvailability {
    BoundaryAvailability {
        has_previous: resolve(current, list, Direction::Previous).is_some(),
        has_next: resolve(current, list, Direction::Next).is_some(),
    }
}
