use serde::{Deserialize, Serialize};

/// Set of "true" positions backed by a dense byte buffer.
///
/// The buffer only ever grows to cover the highest position set, so two
/// bitmaps holding the same positions compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct Bitmap {
    bytes: Vec<u8>,
    highest: Option<u32>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, position: u32) {
        let index = (position / 8) as usize;
        if index >= self.bytes.len() {
            self.bytes.resize(index + 1, 0);
        }
        self.bytes[index] |= 1 << (position % 8);
        if self.highest.map_or(true, |h| position > h) {
            self.highest = Some(position);
        }
    }

    pub fn get(&self, position: u32) -> bool {
        self.bytes
            .get((position / 8) as usize)
            .is_some_and(|byte| byte & (1 << (position % 8)) != 0)
    }

    /// Highest position set, or 0 for an empty bitmap.
    pub fn highest(&self) -> u32 {
        self.highest.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.highest.is_none()
    }

    pub fn len(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Positions set, in ascending order.
    pub fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        self.bytes.iter().enumerate().flat_map(|(index, byte)| {
            (0..8u32)
                .filter(move |bit| byte & (1 << bit) != 0)
                .map(move |bit| index as u32 * 8 + bit)
        })
    }
}

impl FromIterator<u32> for Bitmap {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut bitmap = Bitmap::new();
        bitmap.extend(iter);
        bitmap
    }
}

impl Extend<u32> for Bitmap {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        for position in iter {
            self.set(position);
        }
    }
}

impl From<Vec<u32>> for Bitmap {
    fn from(positions: Vec<u32>) -> Self {
        positions.into_iter().collect()
    }
}

impl From<Bitmap> for Vec<u32> {
    fn from(bitmap: Bitmap) -> Self {
        bitmap.positions().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Bitmap;

    #[test]
    fn set_and_get_across_bytes() {
        let bitmap: Bitmap = [0, 7, 8, 21].into_iter().collect();
        assert!(bitmap.get(0));
        assert!(bitmap.get(7));
        assert!(bitmap.get(8));
        assert!(bitmap.get(21));
        assert!(!bitmap.get(1));
        assert!(!bitmap.get(1_000));
        assert_eq!(bitmap.highest(), 21);
        assert_eq!(bitmap.len(), 4);
        assert_eq!(bitmap.positions().collect::<Vec<_>>(), vec![0, 7, 8, 21]);
    }

    #[test]
    fn empty_bitmap_has_zero_highest() {
        let bitmap = Bitmap::new();
        assert!(bitmap.is_empty());
        assert_eq!(bitmap.highest(), 0);
        assert_eq!(bitmap.positions().count(), 0);
    }

    #[test]
    fn insertion_order_does_not_affect_equality() {
        let a: Bitmap = [30, 2, 9].into_iter().collect();
        let b: Bitmap = [2, 9, 30, 9].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn serializes_as_position_list() {
        let bitmap: Bitmap = [5, 1].into_iter().collect();
        let json = serde_json::to_string(&bitmap).unwrap();
        assert_eq!(json, "[1,5]");
        let back: Bitmap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bitmap);
    }
}
