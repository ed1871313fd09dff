use glam::DVec3;

/// Consumed slots tolerated at the front before a sort compacts them away.
const COMPACT_THRESHOLD: usize = 1000;

#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub pos: DVec3,
    /// Multiplies distance; smaller sorts earlier.
    pub size_factor: f32,
    pub payload: T,
}

impl<T> QueueItem<T> {
    pub fn priority(&self, campos: DVec3) -> f64 {
        campos.distance(self.pos) * self.size_factor as f64
    }
}

/// Priority factor for an entity of the given size and importance.
///
/// Bigger and more important things get smaller factors and load first.
pub fn size_factor_for(bounding_len: f32, importance: f32) -> f32 {
    1.0 / (bounding_len.max(1.0) * importance.max(f32::MIN_POSITIVE))
}

/// A queue that is re-sorted by camera distance only when asked.
///
/// Items are consumed from a moving front index so popping never shifts the
/// backing vector.
#[derive(Debug)]
pub struct LoadQueue<T> {
    items: Vec<Option<QueueItem<T>>>,
    begin: usize,
}

impl<T> Default for LoadQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LoadQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            begin: 0,
        }
    }

    pub fn push(&mut self, item: QueueItem<T>) {
        self.items.push(Some(item));
    }

    pub fn pop_front(&mut self) -> Option<QueueItem<T>> {
        let item = self.items.get_mut(self.begin)?.take();
        self.begin += 1;
        item
    }

    pub fn len(&self) -> usize {
        self.items.len() - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Order the remaining items by ascending priority from `campos`.
    pub fn sort(&mut self, campos: DVec3) {
        if self.begin > COMPACT_THRESHOLD {
            self.items.drain(..self.begin);
            self.begin = 0;
        }
        self.items[self.begin..].sort_by(|a, b| match (a, b) {
            (Some(a), Some(b)) => a.priority(campos).total_cmp(&b.priority(campos)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    }

    /// Slots consumed but not yet compacted.
    pub fn consumed(&self) -> usize {
        self.begin
    }
}
