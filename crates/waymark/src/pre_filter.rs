//! Walkability filters that run on a freshly rasterized [`Heightfield`].

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, SpanKey},
};

/// Ceiling used for the topmost span of a column.
const MAX_HEIGHT: i32 = 0xffff;

impl Heightfield {
    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb_height` of the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle_span.max - walkable_span.max < walkable_climb_height`
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb_height: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous: Option<(u16, AreaType)> = None;
                let mut current = self.span_key_at(x, z);

                // For each span in the column...
                while let Some(span_key) = current {
                    let span = self.span_mut(span_key);
                    let walkable = span.area().is_walkable();

                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    let original_area = span.area();
                    if let Some((previous_max, previous_area)) = previous {
                        if !walkable
                            && previous_area.is_walkable()
                            && (span.max() as i32 - previous_max as i32)
                                <= walkable_climb_height as i32
                        {
                            span.set_area(previous_area);
                        }
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous = Some((span.max(), original_area));
                    current = span.next();
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb_height`
    /// from the current span's maximum. This removes the impossible-to-walk top of a wall.
    /// Spans whose traversable neighbours differ in height by more than `walkable_climb_height`
    /// are removed too, which rejects steep slopes.
    ///
    /// Rows are inspected independently and only mutated once every row has been inspected.
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb_height: u16) {
        #[cfg(feature = "parallel")]
        let ledges: Vec<Vec<SpanKey>> = (0..self.height)
            .into_par_iter()
            .map(|z| self.ledge_spans_in_row(z, walkable_height, walkable_climb_height))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let ledges: Vec<Vec<SpanKey>> = (0..self.height)
            .map(|z| self.ledge_spans_in_row(z, walkable_height, walkable_climb_height))
            .collect();

        let mut removed = 0;
        for span_key in ledges.into_iter().flatten() {
            self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
            removed += 1;
        }
        tracing::debug!(removed, "filtered ledge spans");
    }

    /// Collects the walkable spans of row `z` that are ledges. Only reads the heightfield.
    fn ledge_spans_in_row(
        &self,
        z: u16,
        walkable_height: u16,
        walkable_climb_height: u16,
    ) -> Vec<SpanKey> {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb_height as i32;
        let mut ledges = Vec::new();

        for x in 0..self.width {
            for (span_key, span) in self.column(x, z) {
                // Skip non-walkable spans.
                if !span.area().is_walkable() {
                    continue;
                }

                let floor = span.max() as i32;
                let ceiling = span
                    .next()
                    .map_or(MAX_HEIGHT, |next| self.span(next).min() as i32);

                // The difference between this walkable area and the lowest neighbor walkable area.
                // This is the difference between the current span and all neighbor spans that have
                // enough space for an agent to move between, but not accounting at all for surface slope.
                let mut lowest_neighbor_floor_difference = MAX_HEIGHT;

                // Min and max height of accessible neighbours.
                let mut lowest_traversable_neighbor_floor = floor;
                let mut highest_traversable_neighbor_floor = floor;

                for direction in 0..4 {
                    let neighbor_x = x as i32 + dir_offset_x(direction) as i32;
                    let neighbor_z = z as i32 + dir_offset_z(direction) as i32;

                    // Skip neighbors which are out of bounds.
                    if !self.contains(neighbor_x, neighbor_z) {
                        lowest_neighbor_floor_difference = -walkable_climb - 1;
                        break;
                    }
                    let mut neighbor_spans = self
                        .column(neighbor_x as u16, neighbor_z as u16)
                        .map(|(_, s)| s)
                        .peekable();

                    // The most we can step down to the neighbor is the walkable climb distance.
                    let neighbor_ceiling = neighbor_spans
                        .peek()
                        .map_or(MAX_HEIGHT, |neighbor| neighbor.min() as i32);

                    // Skip neighbour if the gap between the spans is too small.
                    if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                        lowest_neighbor_floor_difference = -walkable_climb - 1;
                        break;
                    }

                    // For each span in the neighboring column...
                    for neighbor in neighbor_spans {
                        let neighbor_floor = neighbor.max() as i32;
                        let neighbor_ceiling = neighbor
                            .next()
                            .map_or(MAX_HEIGHT, |next| self.span(next).min() as i32);

                        // Only consider neighboring areas that have enough overlap to be potentially traversable.
                        if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor) < walkable_height
                        {
                            // No space to traverse between them.
                            continue;
                        }

                        let neighbor_floor_difference = neighbor_floor - floor;
                        lowest_neighbor_floor_difference =
                            lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                        // Find min/max accessible neighbor height.
                        // Only consider neighbors that are at most walkable_climb away.
                        if neighbor_floor_difference.abs() <= walkable_climb {
                            // There is space to move to the neighbor cell and the slope isn't too much.
                            lowest_traversable_neighbor_floor =
                                lowest_traversable_neighbor_floor.min(neighbor_floor);
                            highest_traversable_neighbor_floor =
                                highest_traversable_neighbor_floor.max(neighbor_floor);
                        } else if neighbor_floor_difference < -walkable_climb {
                            // We already know this will be considered a ledge span so we can early-out
                            break;
                        }
                    }
                }

                // The current span is close to a ledge if the magnitude of the drop to any neighbour span
                // is greater than the walkable_climb distance.
                // That is, there is a gap that is large enough to let an agent move between them,
                // but the drop (surface slope) is too large to allow it.
                if lowest_neighbor_floor_difference < -walkable_climb {
                    ledges.push(span_key);
                }
                // If the difference between all neighbor floors is too large, this is a steep slope.
                else if highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
                    > walkable_climb
                {
                    ledges.push(span_key);
                }
            }
        }
        ledges
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified walkable height.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to the maximum heightfield height.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        // Remove walkable flag from spans which do not have enough
        // space above them for the agent to stand there.
        for z in 0..self.height {
            for x in 0..self.width {
                for span_key in self.column_keys(x, z) {
                    let span = self.span(span_key);
                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map_or(MAX_HEIGHT, |next| self.span(next).min() as i32);
                    if ceiling - floor < walkable_height as i32 {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }
}
