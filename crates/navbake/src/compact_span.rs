use crate::region::RegionId;

/// A walkable span in a [`CompactHeightfield`](crate::compact_heightfield::CompactHeightfield).
///
/// The span describes the open space above a solid floor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// The lower extent of the span. (Measured from the heightfield's base.)
    pub y: u16,
    /// The id of the region the span belongs to. (Or [`RegionId::NONE`] if not in a region.)
    pub region: RegionId,
    /// The clearance above the floor, saturating at 255.
    height: u8,
    /// Layer index of the connected span in each direction, or [`CompactSpan::NOT_CONNECTED`].
    connections: [u8; 4],
}

impl Default for CompactSpan {
    fn default() -> Self {
        Self {
            y: 0,
            region: RegionId::NONE,
            height: 0,
            connections: [Self::NOT_CONNECTED; 4],
        }
    }
}

impl CompactSpan {
    /// The value stored in a neighbor slot that has no connection.
    pub const NOT_CONNECTED: u8 = 0x3f;
    /// The highest layer index a connection can refer to.
    pub const MAX_LAYERS: u8 = Self::NOT_CONNECTED - 1;

    /// Sets the neighbor connection data for the given direction.
    /// `None` if the neighbor is not connected.
    #[inline]
    pub fn set_con(&mut self, direction: u8, neighbor: impl Into<Option<u8>>) {
        let value = neighbor
            .into()
            .filter(|layer| *layer <= Self::MAX_LAYERS)
            .unwrap_or(Self::NOT_CONNECTED);
        self.connections[direction as usize & 0x3] = value;
    }

    /// Returns the layer index of the neighbor in the given direction.
    /// `None` if the neighbor is not connected.
    #[inline]
    pub fn con(&self, direction: u8) -> Option<u8> {
        let value = self.connections[direction as usize & 0x3];
        (value != Self::NOT_CONNECTED).then_some(value)
    }

    /// Returns the height of the span.
    #[inline]
    pub fn height(&self) -> u8 {
        self.height
    }

    /// Sets the height of the span.
    #[inline]
    pub fn set_height(&mut self, height: u8) {
        self.height = height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_span() {
        let mut span = CompactSpan::default();
        span.set_height(10);
        assert_eq!(span.height(), 10);
        for dir in 0..4 {
            assert_eq!(span.con(dir), None);
        }
    }

    #[test]
    fn test_compact_span_con() {
        let mut span = CompactSpan::default();
        span.set_con(0, Some(1));
        assert_eq!(span.con(0), Some(1));

        span.set_con(1, Some(3));
        assert_eq!(span.con(1), Some(3));

        span.set_con(2, Some(5));
        assert_eq!(span.con(2), Some(5));

        span.set_con(0, Some(2));
        assert_eq!(span.con(0), Some(2));

        span.set_con(1, None);
        assert_eq!(span.con(1), None);

        span.set_con(2, None);
        assert_eq!(span.con(2), None);

        span.set_con(3, CompactSpan::NOT_CONNECTED);
        assert_eq!(span.con(3), None);
        assert_eq!(span.con(0), Some(2));
    }
}
