//! Timeline element: one timestamped payload split into fixed-size sub-elements.

use std::sync::Weak;

use bytemuck::Pod;
use contracts::{ContractError, ElementDescriptor, Timestamp};
use memory::{policy, BufferManager, BufferObject, BufferView, ConstLock};

/// Timestamped payload of `max_elements` sub-elements plus a presence mask.
///
/// Mutable while owned (between `create_buffer` and `push`); once published it
/// is shared behind an `Arc` and only readable.
#[derive(Debug)]
pub struct TimelineElement {
    timestamp: Timestamp,
    descriptor: ElementDescriptor,
    mask: u64,
    buffer: BufferObject,
}

impl TimelineElement {
    pub(crate) fn allocate(
        timestamp: Timestamp,
        descriptor: ElementDescriptor,
        manager: Weak<dyn BufferManager>,
    ) -> Result<Self, ContractError> {
        let buffer = BufferObject::with_weak_manager(manager);
        buffer.allocate(descriptor.byte_len(), policy::heap())?;
        Ok(Self {
            timestamp,
            descriptor,
            mask: 0,
            buffer,
        })
    }

    /// Reuse a retired element for a new timestamp: zeroed payload, empty mask
    pub(crate) fn recycle(&mut self, timestamp: Timestamp) -> Result<(), ContractError> {
        let lock = self.buffer.lock()?;
        lock.as_mut_slice()?.fill(0);
        self.timestamp = timestamp;
        self.mask = 0;
        Ok(())
    }

    pub(crate) fn deep_copy(&self) -> Result<Self, ContractError> {
        Ok(Self {
            timestamp: self.timestamp,
            descriptor: self.descriptor,
            mask: self.mask,
            buffer: self.buffer.deep_copy()?,
        })
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn descriptor(&self) -> ElementDescriptor {
        self.descriptor
    }

    /// Presence bitmap; bit `i` set means sub-element `i` carries data
    #[inline]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    #[inline]
    pub fn is_present(&self, index: usize) -> bool {
        index < self.descriptor.max_elements && self.mask & (1u64 << index) != 0
    }

    #[inline]
    pub fn present_count(&self) -> usize {
        self.mask.count_ones() as usize
    }

    pub fn present_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.descriptor.max_elements).filter(|i| self.is_present(*i))
    }

    /// Payload buffer
    pub fn buffer(&self) -> &BufferObject {
        &self.buffer
    }

    /// `true` while any reader holds a lock on the payload
    pub fn is_locked(&self) -> bool {
        self.buffer.lock_count() > 0
    }

    fn check_index(&self, index: usize) -> Result<(), ContractError> {
        if index >= self.descriptor.max_elements {
            return Err(ContractError::ElementIndex {
                index,
                max_elements: self.descriptor.max_elements,
            });
        }
        Ok(())
    }

    /// Copy `bytes` into sub-element `index` and mark it present
    pub fn set_element(&mut self, index: usize, bytes: &[u8]) -> Result<(), ContractError> {
        self.check_index(index)?;
        if bytes.len() != self.descriptor.element_size {
            return Err(ContractError::ElementSize {
                index,
                expected: self.descriptor.element_size,
                actual: bytes.len(),
            });
        }
        self.element_mut(index, |slot| slot.copy_from_slice(bytes))
    }

    /// Write a `Pod` value into sub-element `index` and mark it present
    pub fn set_element_as<T: Pod>(&mut self, index: usize, value: &T) -> Result<(), ContractError> {
        self.set_element(index, bytemuck::bytes_of(value))
    }

    /// Edit sub-element `index` in place; it is marked present afterwards
    pub fn element_mut<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, ContractError> {
        self.check_index(index)?;
        let lock = self.buffer.lock()?;
        let mut slot = lock
            .as_mut_slice()?
            .slice(self.descriptor.range_of(index))
            .ok_or(ContractError::ElementIndex {
                index,
                max_elements: self.descriptor.max_elements,
            })?;
        let result = f(&mut slot);
        self.mask |= 1u64 << index;
        Ok(result)
    }

    /// Mark sub-element `index` absent; its bytes are left as they are
    pub fn clear_element(&mut self, index: usize) -> Result<(), ContractError> {
        self.check_index(index)?;
        self.mask &= !(1u64 << index);
        Ok(())
    }

    /// Copy of sub-element `index`, `None` when absent
    pub fn element(&self, index: usize) -> Result<Option<Vec<u8>>, ContractError> {
        self.with_element(index, <[u8]>::to_vec)
    }

    /// Read sub-element `index` as `T`, `None` when absent
    pub fn element_as<T: Pod>(&self, index: usize) -> Result<Option<T>, ContractError> {
        let actual = std::mem::size_of::<T>();
        if actual != self.descriptor.element_size {
            return Err(ContractError::ElementSize {
                index,
                expected: self.descriptor.element_size,
                actual,
            });
        }
        self.with_element(index, bytemuck::pod_read_unaligned::<T>)
    }

    /// Borrow sub-element `index` under a short read lock
    pub fn with_element<R>(
        &self,
        index: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<Option<R>, ContractError> {
        self.check_index(index)?;
        if !self.is_present(index) {
            return Ok(None);
        }
        let lock = self.buffer.lock_const()?;
        let slot = lock
            .as_slice()?
            .slice(self.descriptor.range_of(index))
            .ok_or(ContractError::ElementIndex {
                index,
                max_elements: self.descriptor.max_elements,
            })?;
        Ok(Some(f(&slot)))
    }

    /// Hold the payload: a locked element is never evicted from its timeline
    pub fn lock(&self) -> Result<ElementLock, ContractError> {
        Ok(ElementLock {
            timestamp: self.timestamp,
            descriptor: self.descriptor,
            mask: self.mask,
            lock: self.buffer.lock_const()?,
        })
    }
}

/// Read lock over a published element
#[derive(Debug, Clone)]
pub struct ElementLock {
    timestamp: Timestamp,
    descriptor: ElementDescriptor,
    mask: u64,
    lock: ConstLock,
}

impl ElementLock {
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn descriptor(&self) -> ElementDescriptor {
        self.descriptor
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn is_present(&self, index: usize) -> bool {
        index < self.descriptor.max_elements && self.mask & (1u64 << index) != 0
    }

    /// Sub-element `index`, `None` when absent
    pub fn slot(&self, index: usize) -> Result<Option<BufferView<'_>>, ContractError> {
        if index >= self.descriptor.max_elements {
            return Err(ContractError::ElementIndex {
                index,
                max_elements: self.descriptor.max_elements,
            });
        }
        if !self.is_present(index) {
            return Ok(None);
        }
        Ok(self
            .lock
            .as_slice()?
            .slice(self.descriptor.range_of(index)))
    }

    /// Whole payload, present or not
    pub fn payload(&self) -> Result<BufferView<'_>, ContractError> {
        Ok(self.lock.as_slice()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::NullManager;

    fn element(element_size: usize, max_elements: usize) -> TimelineElement {
        let manager: Weak<dyn BufferManager> = Weak::<NullManager>::new();
        let descriptor = ElementDescriptor::new(element_size, max_elements).unwrap();
        TimelineElement::allocate(Timestamp::from_millis(5.0), descriptor, manager).unwrap()
    }

    #[test]
    fn test_presence_mask() {
        let mut e = element(4, 3);
        assert_eq!(e.mask(), 0);
        assert_eq!(e.element(0).unwrap(), None);

        e.set_element(2, &[1, 2, 3, 4]).unwrap();
        assert_eq!(e.mask(), 0b100);
        assert!(e.is_present(2));
        assert_eq!(e.element(2).unwrap(), Some(vec![1, 2, 3, 4]));
        assert_eq!(e.present_indices().collect::<Vec<_>>(), vec![2]);

        e.clear_element(2).unwrap();
        assert_eq!(e.present_count(), 0);
        assert_eq!(e.element(2).unwrap(), None);
    }

    #[test]
    fn test_index_and_size_checks() {
        let mut e = element(4, 2);
        assert!(matches!(
            e.set_element(2, &[0; 4]),
            Err(ContractError::ElementIndex { index: 2, max_elements: 2 })
        ));
        assert!(matches!(
            e.set_element(0, &[0; 3]),
            Err(ContractError::ElementSize { expected: 4, actual: 3, .. })
        ));
        assert!(!e.is_present(64));
        assert!(e.element_as::<u64>(0).is_err());
    }

    #[test]
    fn test_typed_access() {
        let mut e = element(8, 2);
        e.set_element_as(1, &[1.5f32, -2.0f32]).unwrap();
        assert_eq!(e.element_as::<[f32; 2]>(1).unwrap(), Some([1.5, -2.0]));
        assert_eq!(e.element_as::<[f32; 2]>(0).unwrap(), None);

        e.element_mut(0, |slot| slot[0] = 9).unwrap();
        assert!(e.is_present(0));
        assert_eq!(e.element(0).unwrap().unwrap()[0], 9);
    }

    #[test]
    fn test_element_lock_reads_slots() {
        let mut e = element(2, 2);
        e.set_element(1, &[7, 8]).unwrap();

        let lock = e.lock().unwrap();
        assert!(e.is_locked());
        assert!(lock.slot(0).unwrap().is_none());
        assert_eq!(&*lock.slot(1).unwrap().unwrap(), &[7, 8]);
        assert_eq!(lock.payload().unwrap().len(), 4);
        assert!(lock.slot(2).is_err());

        drop(lock);
        assert!(!e.is_locked());
    }

    #[test]
    fn test_recycle_clears_payload() {
        let mut e = element(2, 1);
        e.set_element(0, &[3, 3]).unwrap();
        e.recycle(Timestamp::from_millis(9.0)).unwrap();
        assert_eq!(e.timestamp(), Timestamp::from_millis(9.0));
        assert_eq!(e.mask(), 0);
        e.element_mut(0, |slot| assert_eq!(slot.to_vec(), vec![0u8, 0])).unwrap();
    }
}
