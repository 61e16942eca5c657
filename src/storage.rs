/// Flat element buffer backing a [`Tensor`](crate::tensor::Tensor).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Storage {
    pub data: Vec<f32>,
}

impl Storage {
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}
