//! Full-mesh channel matrix.
//!
//! For N actors, one directed channel per ordered pair `(i, j)`, `i != j`:
//!
//! ```text
//!          to 0     to 1     to 2
//! from 0    -      [0->1]   [0->2]
//! from 1  [1->0]     -      [1->2]
//! from 2  [2->0]   [2->1]     -
//! ```
//!
//! Actor `k` keeps row `k` (its writers) and column `k` (its readers).

use bankmesh_env::{ActorId, ChannelFactory, ChannelReader, ChannelWriter, MAX_ACTORS};
use tracing::debug;

use crate::error::SetupError;
use crate::transport::ActorEndpoints;

/// Smallest meaningful mesh: a coordinator and one peer.
pub const MIN_ACTORS: usize = 2;

/// Every channel half of an N-actor mesh, before it is handed out.
pub struct ChannelMatrix {
    n: usize,
    /// `writers[from][to]`
    writers: Vec<Vec<Option<ChannelWriter>>>,
    /// `readers[from][to]`
    readers: Vec<Vec<Option<ChannelReader>>>,
}

/// Presence of both halves of one directed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSlot {
    pub from: ActorId,
    pub to: ActorId,
    pub writer_open: bool,
    pub reader_open: bool,
}

impl ChannelMatrix {
    /// Opens all N*(N-1) channels.
    ///
    /// Any failure aborts the whole build; channels opened so far are
    /// dropped with the partial matrix.
    pub fn build(n: usize, factory: &dyn ChannelFactory) -> Result<Self, SetupError> {
        if !(MIN_ACTORS..=MAX_ACTORS).contains(&n) {
            return Err(SetupError::InvalidActorCount {
                count: n,
                min: MIN_ACTORS,
                max: MAX_ACTORS,
            });
        }

        let mut writers: Vec<Vec<Option<ChannelWriter>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();
        let mut readers: Vec<Vec<Option<ChannelReader>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();

        for from in ActorId::all(n) {
            for to in from.peers(n) {
                let (w, r) = factory
                    .open(from, to)
                    .map_err(|source| SetupError::ChannelCreation { from, to, source })?;
                writers[from.index()][to.index()] = Some(w);
                readers[from.index()][to.index()] = Some(r);
            }
        }

        debug!(actors = n, channels = n * (n - 1), backend = factory.name(), "channel matrix built");
        Ok(Self { n, writers, readers })
    }

    /// Number of actors.
    pub fn actor_count(&self) -> usize {
        self.n
    }

    /// Number of directed channels with at least one half still held.
    pub fn open_channels(&self) -> usize {
        self.layout()
            .iter()
            .filter(|slot| slot.writer_open || slot.reader_open)
            .count()
    }

    /// Per-channel view of which halves are still held, row-major.
    pub fn layout(&self) -> Vec<ChannelSlot> {
        ActorId::all(self.n)
            .flat_map(|from| from.peers(self.n).map(move |to| (from, to)))
            .map(|(from, to)| ChannelSlot {
                from,
                to,
                writer_open: self.writers[from.index()][to.index()].is_some(),
                reader_open: self.readers[from.index()][to.index()].is_some(),
            })
            .collect()
    }

    /// Logs the channel layout at debug level.
    pub fn log_layout(&self) {
        for slot in self.layout() {
            debug!(
                from = %slot.from,
                to = %slot.to,
                writer = slot.writer_open,
                reader = slot.reader_open,
                "channel {}",
                if slot.writer_open && slot.reader_open { "OPEN" } else { "CLOSED" }
            );
        }
    }

    /// Keeps only what `id` needs and drops (closes) every other half.
    pub fn restrict(mut self, id: ActorId) -> Result<ActorEndpoints, SetupError> {
        if id.index() >= self.n {
            return Err(SetupError::UnknownActor { id, n: self.n });
        }
        Ok(self.take(id))
    }

    /// Splits the matrix into every actor's endpoints, indexed by ID.
    pub fn into_endpoints(mut self) -> Vec<ActorEndpoints> {
        ActorId::all(self.n).map(|id| self.take(id)).collect()
    }

    fn take(&mut self, id: ActorId) -> ActorEndpoints {
        let k = id.index();
        let writers = self.writers[k].iter_mut().map(Option::take).collect();
        let readers = self.readers.iter_mut().map(|row| row[k].take()).collect();
        ActorEndpoints::new(id, writers, readers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankmesh_env::{ChannelError, MemoryChannelFactory};
    use std::cell::Cell;

    /// Factory that fails on its `fail_at`-th channel.
    struct FlakyFactory {
        inner: MemoryChannelFactory,
        opened: Cell<usize>,
        fail_at: usize,
    }

    impl ChannelFactory for FlakyFactory {
        fn open(&self, from: ActorId, to: ActorId) -> Result<(ChannelWriter, ChannelReader), ChannelError> {
            let count = self.opened.get();
            self.opened.set(count + 1);
            if count == self.fail_at {
                return Err(ChannelError::create("descriptor limit reached"));
            }
            self.inner.open(from, to)
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_build_opens_every_ordered_pair() {
        for n in MIN_ACTORS..=6 {
            let matrix = ChannelMatrix::build(n, &MemoryChannelFactory::default()).unwrap();
            assert_eq!(matrix.open_channels(), n * (n - 1));
            assert!(matrix.layout().iter().all(|s| s.from != s.to));
        }
    }

    #[test]
    fn test_build_rejects_bad_actor_counts() {
        let factory = MemoryChannelFactory::default();
        assert!(matches!(
            ChannelMatrix::build(1, &factory),
            Err(SetupError::InvalidActorCount { count: 1, .. })
        ));
        assert!(ChannelMatrix::build(MAX_ACTORS + 1, &factory).is_err());
    }

    #[test]
    fn test_build_fails_whole_on_one_bad_channel() {
        let factory = FlakyFactory {
            inner: MemoryChannelFactory::default(),
            opened: Cell::new(0),
            fail_at: 4,
        };
        match ChannelMatrix::build(3, &factory) {
            Err(SetupError::ChannelCreation { from, to, .. }) => {
                // Row-major order: 0->1, 0->2, 1->0, 1->2, 2->0
                assert_eq!((from, to), (ActorId(2), ActorId(0)));
            }
            _ => panic!("expected ChannelCreation"),
        }
    }

    #[test]
    fn test_restrict_keeps_only_own_halves() {
        let matrix = ChannelMatrix::build(4, &MemoryChannelFactory::default()).unwrap();
        let eps = matrix.restrict(ActorId(2)).unwrap();

        assert_eq!(eps.local_id(), ActorId(2));
        for peer in ActorId(2).peers(4) {
            assert!(eps.has_writer(peer));
            assert!(eps.has_reader(peer));
        }
        assert!(!eps.has_writer(ActorId(2)));
        assert!(!eps.has_reader(ActorId(2)));
    }

    #[test]
    fn test_into_endpoints_moves_every_half_once() {
        let matrix = ChannelMatrix::build(3, &MemoryChannelFactory::default()).unwrap();
        let eps = matrix.into_endpoints();

        assert_eq!(eps.len(), 3);
        for (i, ep) in eps.iter().enumerate() {
            assert_eq!(ep.local_id(), ActorId::from_index(i));
            assert_eq!(ep.peers().filter(|p| ep.has_writer(*p)).count(), 2);
            assert_eq!(ep.peers().filter(|p| ep.has_reader(*p)).count(), 2);
        }
    }

    #[test]
    fn test_take_clears_matrix_slots() {
        let mut matrix = ChannelMatrix::build(3, &MemoryChannelFactory::default()).unwrap();
        let _one = matrix.take(ActorId(1));

        // Row 1 and column 1 are now partially empty: 4 of 6 channels lost a half.
        let touched = matrix
            .layout()
            .into_iter()
            .filter(|s| !(s.writer_open && s.reader_open))
            .count();
        assert_eq!(touched, 4);
    }
}
