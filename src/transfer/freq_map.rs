use std::collections::BTreeMap;

/// Frequencies closer than this share a key.
pub const KEY_RESOLUTION_HZ: f64 = 1e-6;

/// Frequency quantized to [`KEY_RESOLUTION_HZ`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrequencyKey(i64);

impl FrequencyKey {
    pub fn from_hz(freq_hz: f64) -> Self {
        Self((freq_hz / KEY_RESOLUTION_HZ).round() as i64)
    }
}

/// Ordered map from drive frequency to a value, with nearest-key lookup.
#[derive(Clone, Debug)]
pub struct FrequencyMap<V> {
    entries: BTreeMap<FrequencyKey, (f64, V)>, // key -> (exact frequency, value)
}

impl<V> Default for FrequencyMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> FrequencyMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, freq_hz: f64) -> bool {
        self.entries.contains_key(&FrequencyKey::from_hz(freq_hz))
    }

    pub fn get(&self, freq_hz: f64) -> Option<&V> {
        self.entries.get(&FrequencyKey::from_hz(freq_hz)).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, freq_hz: f64) -> Option<&mut V> {
        self.entries
            .get_mut(&FrequencyKey::from_hz(freq_hz))
            .map(|(_, v)| v)
    }

    pub fn insert(&mut self, freq_hz: f64, value: V) -> Option<V> {
        self.entries
            .insert(FrequencyKey::from_hz(freq_hz), (freq_hz, value))
            .map(|(_, old)| old)
    }

    pub fn get_or_insert_with(&mut self, freq_hz: f64, make: impl FnOnce() -> V) -> &mut V {
        &mut self
            .entries
            .entry(FrequencyKey::from_hz(freq_hz))
            .or_insert_with(|| (freq_hz, make()))
            .1
    }

    /// Frequencies in ascending order.
    pub fn frequencies(&self) -> Vec<f64> {
        self.entries.values().map(|(f, _)| *f).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &V)> + '_ {
        self.entries.values().map(|(f, v)| (*f, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.entries.values().map(|(_, v)| v)
    }

    pub fn first(&self) -> Option<(f64, &V)> {
        self.entries.values().next().map(|(f, v)| (*f, v))
    }

    /// Entry whose frequency is closest to `freq_hz`; ties go to the lower key.
    pub fn nearest(&self, freq_hz: f64) -> Option<(f64, &V)> {
        let key = FrequencyKey::from_hz(freq_hz);
        let below = self.entries.range(..=key).next_back().map(|(_, e)| e);
        let above = self.entries.range(key..).next().map(|(_, e)| e);
        let best = match (below, above) {
            (Some(b), Some(a)) => {
                if (a.0 - freq_hz).abs() < (freq_hz - b.0).abs() {
                    a
                } else {
                    b
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        Some((best.0, &best.1))
    }

    pub fn map_values<W>(&self, mut f: impl FnMut(f64, &V) -> W) -> FrequencyMap<W> {
        FrequencyMap {
            entries: self
                .entries
                .iter()
                .map(|(k, (freq, v))| (*k, (*freq, f(*freq, v))))
                .collect(),
        }
    }
}

/// Index of the value closest to `target`; the first one wins ties.
pub fn nearest_index(values: &[f64], target: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, v)| {
            let dist = (v - target).abs();
            match best {
                Some((_, d)) if d <= dist => best,
                _ => Some((i, dist)),
            }
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_floats_share_a_key() {
        let mut map = FrequencyMap::new();
        map.insert(41.0, 1);
        assert!(map.contains(41.0 + 1e-9));
        *map.get_or_insert_with(41.0 + 1e-9, || 0) += 1;
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(41.0), Some(&2));
    }

    #[test]
    fn frequencies_are_sorted() {
        let mut map = FrequencyMap::new();
        for f in [30.0, 10.0, 20.0] {
            map.insert(f, ());
        }
        assert_eq!(map.frequencies(), vec![10.0, 20.0, 30.0]);
        assert_eq!(map.first().map(|(f, _)| f), Some(10.0));
    }

    #[test]
    fn nearest_picks_closest_and_lower_on_ties() {
        let mut map = FrequencyMap::new();
        map.insert(10.0, 'a');
        map.insert(20.0, 'b');
        assert_eq!(map.nearest(14.0), Some((10.0, &'a')));
        assert_eq!(map.nearest(16.0), Some((20.0, &'b')));
        assert_eq!(map.nearest(15.0), Some((10.0, &'a')));
        assert_eq!(map.nearest(1000.0), Some((20.0, &'b')));
        assert_eq!(FrequencyMap::<u8>::new().nearest(1.0), None);
    }

    #[test]
    fn nearest_index_prefers_first_on_ties() {
        assert_eq!(nearest_index(&[0.0, 1.0, 2.0, 3.0], 1.5), Some(1));
        assert_eq!(nearest_index(&[0.0, 1.0, 2.0], 9.0), Some(2));
        assert_eq!(nearest_index(&[], 1.0), None);
    }
}
