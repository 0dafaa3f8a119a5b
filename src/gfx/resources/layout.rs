//! Vertex buffer layout descriptions.
//!
//! A [`VertexBufferLayout`] lists the elements of one interleaved vertex in
//! order. Offsets and the stride are accumulated as elements are added.

/// Element type of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementType {
    /// Size in bytes. `Bool` is stored as a 32-bit value since vertex
    /// fetch has no single-byte formats.
    pub const fn size(self) -> u32 {
        match self {
            ElementType::Float | ElementType::Int | ElementType::Bool => 4,
            ElementType::Vec2 => 8,
            ElementType::Vec3 => 12,
            ElementType::Vec4 => 16,
            ElementType::Mat2 => 16,
            ElementType::Mat3 => 36,
            ElementType::Mat4 => 64,
        }
    }

    /// Number of scalar components.
    pub const fn component_count(self) -> u32 {
        match self {
            ElementType::Float | ElementType::Int | ElementType::Bool => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 => 4,
            ElementType::Mat2 => 4,
            ElementType::Mat3 => 9,
            ElementType::Mat4 => 16,
        }
    }

    /// Attribute slots the element occupies. Matrices take one per column.
    pub const fn attribute_slots(self) -> u32 {
        match self {
            ElementType::Mat2 => 2,
            ElementType::Mat3 => 3,
            ElementType::Mat4 => 4,
            _ => 1,
        }
    }

    /// Byte size of a single attribute slot.
    pub const fn slot_size(self) -> u32 {
        self.size() / self.attribute_slots()
    }
}

/// One attribute inside a vertex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub name: String,
    pub element_type: ElementType,
    pub offset: u32,
    pub normalized: bool,
}

impl VertexElement {
    pub fn size(&self) -> u32 {
        self.element_type.size()
    }

    pub fn component_count(&self) -> u32 {
        self.element_type.component_count()
    }
}

/// Ordered list of elements making up one interleaved vertex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    elements: Vec<VertexElement>,
    stride: u32,
}

impl VertexBufferLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a layout from `(type, name)` pairs in order.
    pub fn from_elements<'a, I>(elements: I) -> Self
    where
        I: IntoIterator<Item = (ElementType, &'a str)>,
    {
        let mut layout = Self::new();
        for (element_type, name) in elements {
            layout.add(element_type, name);
        }
        layout
    }

    /// Appends an element after the current last one.
    pub fn add(&mut self, element_type: ElementType, name: &str) -> &mut Self {
        self.push(element_type, name, false)
    }

    /// Appends an element whose integer data is normalized on fetch.
    pub fn add_normalized(&mut self, element_type: ElementType, name: &str) -> &mut Self {
        self.push(element_type, name, true)
    }

    fn push(&mut self, element_type: ElementType, name: &str, normalized: bool) -> &mut Self {
        self.elements.push(VertexElement {
            name: name.to_owned(),
            element_type,
            offset: self.stride,
            normalized,
        });
        self.stride += element_type.size();
        self
    }

    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// Byte distance between consecutive vertices.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Total attribute slots consumed when bound to a vertex array.
    pub fn attribute_slots(&self) -> u32 {
        self.elements
            .iter()
            .map(|e| e.element_type.attribute_slots())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_and_stride_accumulate() {
        let layout = VertexBufferLayout::from_elements([
            (ElementType::Vec3, "position"),
            (ElementType::Vec2, "texCoord"),
            (ElementType::Vec3, "normal"),
            (ElementType::Vec3, "color"),
        ]);

        let offsets: Vec<u32> = layout.elements().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20, 32]);
        assert_eq!(layout.stride(), 44);
        assert_eq!(layout.attribute_slots(), 4);
    }

    #[test]
    fn test_matrix_elements_take_one_slot_per_column() {
        let mut layout = VertexBufferLayout::new();
        layout.add(ElementType::Mat4, "instance").add(ElementType::Float, "weight");

        assert_eq!(layout.stride(), 68);
        assert_eq!(layout.attribute_slots(), 5);
        assert_eq!(ElementType::Mat3.slot_size(), 12);
        assert_eq!(ElementType::Mat3.component_count(), 9);
    }
}
