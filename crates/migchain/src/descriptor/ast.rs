use crate::error::SourceSpan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLit {
    pub value: String,
    pub quote: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignedValue {
    None,
    Str(StringLit),
    Tuple(Vec<StringLit>),
    /// Any expression that is not a plain literal.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub value: AssignedValue,
    /// Right-hand side of the assignment.
    pub value_span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub value: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorFile {
    pub revision: Option<Assignment>,
    pub down_revision: Option<Assignment>,
    pub revision_id_header: Option<HeaderField>,
    pub revises_header: Option<HeaderField>,
    pub create_date_header: Option<HeaderField>,
}
