//! Schema validation for implementation configuration tables.
//!
//! Each pluggable implementation receives its own raw TOML table. Factories
//! validate that table against a [`Schema`] before building anything, so a
//! misconfigured backend fails at startup with the offending field named.

use thiserror::Error;

/// A configuration table that does not match its schema.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Field '{field}' must be {expected}, found {actual}")]
	TypeMismatch {
		field: String,
		expected: &'static str,
		actual: &'static str,
	},
}

/// Expected type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	/// Integer with optional inclusive bounds.
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
}

impl FieldType {
	fn check(&self, field: &str, value: &toml::Value) -> Result<(), ValidationError> {
		let expected = match self {
			FieldType::String if value.is_str() => return Ok(()),
			FieldType::Boolean if value.is_bool() => return Ok(()),
			FieldType::Integer { min, max } => match value.as_integer() {
				Some(number) => return check_bounds(field, number, *min, *max),
				None => "an integer",
			},
			FieldType::String => "a string",
			FieldType::Boolean => "a boolean",
		};
		Err(ValidationError::TypeMismatch {
			field: field.to_string(),
			expected,
			actual: value.type_str(),
		})
	}
}

fn check_bounds(
	field: &str,
	number: i64,
	min: Option<i64>,
	max: Option<i64>,
) -> Result<(), ValidationError> {
	let message = match (min, max) {
		(Some(min), _) if number < min => format!("{} is below the minimum of {}", number, min),
		(_, Some(max)) if number > max => format!("{} is above the maximum of {}", number, max),
		_ => return Ok(()),
	};
	Err(ValidationError::InvalidValue {
		field: field.to_string(),
		message,
	})
}

/// Extra check run once the field has the right type.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named field in a schema.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("has_validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		self.field_type.check(&self.name, value)?;
		match &self.validator {
			Some(validator) => validator(value).map_err(|message| ValidationError::InvalidValue {
				field: self.name.clone(),
				message,
			}),
			None => Ok(()),
		}
	}
}

/// Required and optional fields of a configuration table.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Checks the declared fields of `config`; unknown keys pass through.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let Some(table) = config.as_table() else {
			return Err(ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "a table",
				actual: config.type_str(),
			});
		};

		for field in &self.required {
			match table.get(&field.name) {
				Some(value) => field.check(value)?,
				None => return Err(ValidationError::MissingField(field.name.clone())),
			}
		}
		self.optional
			.iter()
			.filter_map(|field| table.get(&field.name).map(|value| (field, value)))
			.try_for_each(|(field, value)| field.check(value))
	}
}

/// Configuration schema of one implementation.
pub trait ConfigSchema: Send + Sync {
	/// Validates the implementation's TOML table.
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

/// Validator accepting only URLs with one of the given schemes.
pub fn url_validator(
	schemes: &'static [&'static str],
) -> impl Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static {
	move |value| {
		let url = value.as_str().unwrap_or_default();
		if schemes
			.iter()
			.any(|scheme| url.starts_with(&format!("{}://", scheme)))
		{
			Ok(())
		} else {
			Err(format!("URL must use one of {:?}", schemes))
		}
	}
}
