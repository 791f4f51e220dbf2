//! Element descriptor: the single sizing contract for timeline elements.

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Upper bound on sub-elements per timeline element (width of the presence mask).
pub const MAX_SUB_ELEMENTS: usize = 64;

/// Byte size of one sub-element and the number of sub-elements per timeline element.
///
/// A timeline element's payload is `element_size * max_elements` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub element_size: usize,
    pub max_elements: usize,
}

impl ElementDescriptor {
    /// Build a validated descriptor.
    ///
    /// # Errors
    /// `InvalidDescriptor` when either dimension is zero or `max_elements`
    /// exceeds [`MAX_SUB_ELEMENTS`].
    pub fn new(element_size: usize, max_elements: usize) -> Result<Self, ContractError> {
        let descriptor = Self {
            element_size,
            max_elements,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        let reason = if self.element_size == 0 {
            Some("element_size must be > 0")
        } else if self.max_elements == 0 {
            Some("max_elements must be > 0")
        } else if self.max_elements > MAX_SUB_ELEMENTS {
            Some("max_elements exceeds the 64-bit presence mask")
        } else if self.element_size.checked_mul(self.max_elements).is_none() {
            Some("element_size * max_elements overflows")
        } else {
            None
        };

        match reason {
            Some(message) => Err(ContractError::InvalidDescriptor {
                element_size: self.element_size,
                max_elements: self.max_elements,
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Total payload bytes of one element.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.element_size * self.max_elements
    }

    /// Byte range of sub-element `index` inside the payload.
    #[inline]
    pub fn range_of(&self, index: usize) -> std::ops::Range<usize> {
        let start = index * self.element_size;
        start..start + self.element_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_descriptor() {
        let d = ElementDescriptor::new(64, 4).unwrap();
        assert_eq!(d.byte_len(), 256);
        assert_eq!(d.range_of(2), 128..192);
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(ElementDescriptor::new(0, 4).is_err());
        let err = ElementDescriptor::new(8, 0).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("max_elements must be > 0"));
    }

    #[test]
    fn test_mask_width_enforced() {
        assert!(ElementDescriptor::new(4, MAX_SUB_ELEMENTS).is_ok());
        assert!(ElementDescriptor::new(4, MAX_SUB_ELEMENTS + 1).is_err());
    }
}
