use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputField {
    pub name: String,
    pub description: String,
}

impl OutputField {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into() }
    }
}

/// Named set of output fields a generation step is asked to fill.
///
/// Every declared field is treated as required by the parser, including the
/// ones a caller thinks of as optional. `primary` names the field that must
/// always reach the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub fields: Vec<OutputField>,
    pub primary: String,
}

impl OutputSchema {
    pub fn new(
        name: impl Into<String>,
        primary: OutputField,
        secondary: impl IntoIterator<Item = OutputField>,
    ) -> Self {
        let primary_name = primary.name.clone();
        let mut fields = vec![primary];
        fields.extend(secondary.into_iter().filter(|field| field.name != primary_name));
        Self { name: name.into(), fields, primary: primary_name }
    }

    /// Minimal schema carrying only the primary field.
    pub fn reduced(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|field| field.name == self.primary)
            .cloned()
            .collect::<Vec<_>>();
        Self { name: format!("{}.reduced", self.name), fields, primary: self.primary.clone() }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    pub fn secondary_fields(&self) -> impl Iterator<Item = &OutputField> {
        self.fields.iter().filter(move |field| field.name != self.primary)
    }

    pub fn is_reduced(&self) -> bool {
        self.secondary_fields().next().is_none()
    }
}
