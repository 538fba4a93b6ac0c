/// Finite integer domains stored as bitsets, with a trail so that every
/// narrowing done after a checkpoint can be undone.
///
/// Values of a variable are `0..size`. Only removals are supported, which is
/// all a backtracking search needs.
#[derive(Debug, Clone, Default)]
pub struct HosterDomains {
    words: Vec<Vec<u64>>,
    sizes: Vec<usize>,
    trail: Vec<TrailEntry>,
}

#[derive(Debug, Clone, Copy)]
struct TrailEntry {
    var: usize,
    word: usize,
    previous: u64,
    previous_size: usize,
}

/// Position in the trail to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

impl HosterDomains {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable with the full domain `0..size` and returns its index.
    pub fn add_variable(&mut self, size: usize) -> usize {
        let nb_words = size.div_ceil(64);
        let mut words = vec![u64::MAX; nb_words];
        if size % 64 != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << (size % 64)) - 1;
            }
        }
        self.words.push(words);
        self.sizes.push(size);
        self.words.len() - 1
    }

    pub fn nb_variables(&self) -> usize {
        self.words.len()
    }

    pub fn size(&self, var: usize) -> usize {
        self.sizes[var]
    }

    pub fn is_empty(&self, var: usize) -> bool {
        self.sizes[var] == 0
    }

    pub fn contains(&self, var: usize, value: usize) -> bool {
        self.words[var].get(value / 64).is_some_and(|w| w & (1u64 << (value % 64)) != 0)
    }

    pub fn values(&self, var: usize) -> Vec<usize> {
        let mut values = Vec::with_capacity(self.sizes[var]);
        for (i, word) in self.words[var].iter().enumerate() {
            let mut w = *word;
            while w != 0 {
                let bit = w.trailing_zeros() as usize;
                values.push(i * 64 + bit);
                w &= w - 1;
            }
        }
        values
    }

    /// The single value of an instantiated variable.
    pub fn value(&self, var: usize) -> Option<usize> {
        if self.sizes[var] == 1 { self.values(var).first().copied() } else { None }
    }

    /// Removes `value`. Returns `true` if the domain changed.
    pub fn remove(&mut self, var: usize, value: usize) -> bool {
        if !self.contains(var, value) {
            return false;
        }
        let word = value / 64;
        self.save(var, word);
        self.words[var][word] &= !(1u64 << (value % 64));
        self.sizes[var] -= 1;
        true
    }

    /// Keeps only the values accepted by `keep`. Returns `true` if the domain changed.
    pub fn retain(&mut self, var: usize, keep: impl Fn(usize) -> bool) -> bool {
        let mut changed = false;
        for value in self.values(var) {
            if !keep(value) {
                changed |= self.remove(var, value);
            }
        }
        changed
    }

    /// Reduces the domain to `value`. Returns `false` if `value` was not in it.
    pub fn instantiate(&mut self, var: usize, value: usize) -> bool {
        if !self.contains(var, value) {
            return false;
        }
        self.retain(var, |v| v == value);
        true
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.trail.len())
    }

    /// Undoes every change made since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        while self.trail.len() > checkpoint.0 {
            if let Some(entry) = self.trail.pop() {
                self.words[entry.var][entry.word] = entry.previous;
                self.sizes[entry.var] = entry.previous_size;
            }
        }
    }

    /// Drops the trail. Changes made so far become permanent.
    pub fn commit(&mut self) {
        self.trail.clear();
    }

    fn save(&mut self, var: usize, word: usize) {
        self.trail.push(TrailEntry { var, word, previous: self.words[var][word], previous_size: self.sizes[var] });
    }
}
