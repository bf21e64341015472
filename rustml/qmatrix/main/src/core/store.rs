/// Handle table for live quantized matrices.
///
/// Slots are reused through a free list; every slot carries a generation that
/// is bumped on destroy, so a handle from an earlier occupant is detected as
/// stale instead of aliasing the new matrix.
use crate::api::error::{QMatrixError, QMatrixResult};
use crate::api::types::MatrixHandle;
use crate::core::matrix::{QMatrix, QMatrixParts};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct Slot {
    generation: u32,
    matrix: Option<Arc<QMatrix>>,
}

#[derive(Debug, Default)]
struct Slots {
    entries: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

#[derive(Debug, Default)]
pub struct MatrixStore {
    slots: RwLock<Slots>,
}

static GLOBAL_STORE: OnceLock<MatrixStore> = OnceLock::new();

impl MatrixStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store behind the free boundary functions.
    pub fn global() -> &'static MatrixStore {
        GLOBAL_STORE.get_or_init(MatrixStore::new)
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate `parts` and store the resulting matrix.
    pub fn create(&self, parts: QMatrixParts) -> QMatrixResult<MatrixHandle> {
        let matrix = QMatrix::from_parts(parts)?;
        let info = matrix.info();
        let handle = self.insert(matrix)?;
        log::debug!(
            "[qmatrix] create {} [{}x{}] scheme={:?} groups={}",
            handle, info.rows, info.cols, info.scheme, info.groups
        );
        Ok(handle)
    }

    pub fn insert(&self, matrix: QMatrix) -> QMatrixResult<MatrixHandle> {
        let mut slots = self.write();
        let matrix = Some(Arc::new(matrix));
        let handle = match slots.free.pop() {
            Some(index) => {
                let slot = &mut slots.entries[index as usize];
                slot.matrix = matrix;
                MatrixHandle::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(slots.entries.len())
                    .map_err(|_| QMatrixError::Runtime("matrix handle table is full".into()))?;
                slots.entries.push(Slot { generation: 1, matrix });
                MatrixHandle::new(index, 1)
            }
        };
        slots.live += 1;
        Ok(handle)
    }

    /// Release the matrix. Calls already running on it finish normally; the
    /// handle is stale from here on.
    pub fn destroy(&self, handle: MatrixHandle) -> QMatrixResult<()> {
        let mut slots = self.write();
        let slot = slots
            .entries
            .get_mut(handle.index())
            .filter(|s| s.generation == handle.generation() && s.matrix.is_some())
            .ok_or(QMatrixError::StaleHandle(handle))?;
        slot.matrix = None;
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            g => g,
        };
        slots.free.push(handle.index() as u32);
        slots.live -= 1;
        log::debug!("[qmatrix] destroy {}", handle);
        Ok(())
    }

    pub fn get(&self, handle: MatrixHandle) -> QMatrixResult<Arc<QMatrix>> {
        let slots = self.read();
        slots
            .entries
            .get(handle.index())
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.matrix.clone())
            .ok_or(QMatrixError::StaleHandle(handle))
    }

    pub fn contains(&self, handle: MatrixHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Number of live matrices.
    pub fn len(&self) -> usize {
        self.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
