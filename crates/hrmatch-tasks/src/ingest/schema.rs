//! Declarative mapping from form questions to entity attributes.
//!
//! A schema is a table of [`FieldMapping`]s. Each mapping names the question
//! (by id or display name), the entity and attribute it fills, and the
//! [`Coercion`] that turns the raw answer into a typed value.

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use hrmatch_core::{Error, NewCandidate, NewCompany, NewJobPosting, NewSubmission, Result};

use super::form_api::FormSubmission;

/// Entity a form answer is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Target {
    Candidate,
    Submission,
    Company,
    /// A vacancy; the slot is its 1-based position on the form.
    JobPosting(u8),
}

/// Component of a structured address answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    Street,
    City,
    State,
    Country,
    ZipCode,
}

impl AddressField {
    fn key(self) -> &'static str {
        match self {
            AddressField::Street => "address",
            AddressField::City => "city",
            AddressField::State => "state",
            AddressField::Country => "country",
            AddressField::ZipCode => "zipCode",
        }
    }
}

/// How a raw answer becomes an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Trimmed string; lists contribute their first element.
    Text,
    /// Non-empty elements joined with ", ".
    List,
    /// `true`, `yes`, `1` or `on`.
    Bool,
    /// Leading integer of the answer.
    Integer,
    /// Number with currency symbols and separators stripped.
    Decimal,
    /// `url` of an uploaded file.
    FileUrl,
    AddressPart(AddressField),
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn first_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Array(items) => items.first().and_then(scalar_text),
        other => scalar_text(other),
    }
}

impl Coercion {
    /// Coerce `value`; `None` means the attribute stays unset.
    pub fn apply(&self, value: &JsonValue) -> Option<JsonValue> {
        match self {
            Coercion::Text => first_text(value).map(JsonValue::String),
            Coercion::List => match value {
                JsonValue::Array(items) => {
                    let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
                    (!parts.is_empty()).then(|| JsonValue::String(parts.join(", ")))
                }
                other => scalar_text(other).map(JsonValue::String),
            },
            Coercion::Bool => match value {
                JsonValue::Null => None,
                JsonValue::Bool(b) => Some(JsonValue::Bool(*b)),
                JsonValue::Number(n) => Some(JsonValue::Bool(n.as_f64() != Some(0.0))),
                other => {
                    let text = first_text(other).unwrap_or_default().to_lowercase();
                    Some(JsonValue::Bool(matches!(
                        text.as_str(),
                        "true" | "yes" | "1" | "on"
                    )))
                }
            },
            Coercion::Integer => {
                if let Some(n) = value.as_i64() {
                    return Some(n.into());
                }
                if let Some(f) = value.as_f64() {
                    return Some((f.trunc() as i64).into());
                }
                let text = first_text(value)?;
                let digits: String = text
                    .trim_start()
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                digits.parse::<i64>().ok().map(Into::into)
            }
            Coercion::Decimal => {
                if let Some(f) = value.as_f64() {
                    return serde_json::Number::from_f64(f).map(JsonValue::Number);
                }
                let text = first_text(value)?;
                let cleaned: String = text
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                cleaned
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(JsonValue::Number)
            }
            Coercion::FileUrl => {
                let file = match value {
                    JsonValue::Array(items) => items.first()?,
                    other => other,
                };
                file.get("url")
                    .and_then(scalar_text)
                    .map(JsonValue::String)
            }
            Coercion::AddressPart(part) => value
                .get(part.key())
                .and_then(scalar_text)
                .map(JsonValue::String),
        }
    }
}

/// One row of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// Question id or display name.
    pub key: &'static str,
    pub target: Target,
    pub attribute: &'static str,
    pub coercion: Coercion,
}

const fn field(
    key: &'static str,
    target: Target,
    attribute: &'static str,
    coercion: Coercion,
) -> FieldMapping {
    FieldMapping {
        key,
        target,
        attribute,
        coercion,
    }
}

use Coercion::*;
use Target::*;

const RESUME_ADDRESS: &str = "Your Address";

/// Applicant form.
pub const RESUME_SCHEMA: &[FieldMapping] = &[
    field("First Name", Candidate, "first_name", Text),
    field("Last Name", Candidate, "last_name", Text),
    field("Email", Candidate, "email", Text),
    field("Mobile Number", Candidate, "phone", Text),
    field("LinkedIn Profile", Candidate, "linkedin", Text),
    field(RESUME_ADDRESS, Candidate, "address", AddressPart(AddressField::Street)),
    field(RESUME_ADDRESS, Candidate, "city", AddressPart(AddressField::City)),
    field(RESUME_ADDRESS, Candidate, "state", AddressPart(AddressField::State)),
    field(RESUME_ADDRESS, Candidate, "country", AddressPart(AddressField::Country)),
    field(RESUME_ADDRESS, Candidate, "zip_code", AddressPart(AddressField::ZipCode)),
    field("What position are you applying for?", Submission, "position", Text),
    field("Current Company", Submission, "current_company", Text),
    field("Current Role", Submission, "current_role", Text),
    field("Years of Experience", Submission, "years_experience", Integer),
    field("Min Salary", Submission, "min_salary", Decimal),
    field("Max Salary", Submission, "max_salary", Decimal),
    field("Currency", Submission, "salary_currency", Text),
    field("Degree Level", Submission, "education_level", List),
    field("Field of Study", Submission, "field_of_study", List),
    field("University", Submission, "university", Text),
    field("Graduation Year", Submission, "graduation_year", Integer),
    field("Core Competency", Submission, "core_competency", List),
    field("Preferred Role Type", Submission, "preferred_role_type", List),
    field("Preferred Industry", Submission, "preferred_industry", List),
    field("Work Preference", Submission, "work_preference", Text),
    field(
        "Are you willing to relocate for the right opportunity?",
        Submission,
        "willing_to_relocate",
        Text,
    ),
    field(
        "Are you legally authorized to work in the United States?",
        Submission,
        "us_work_authorized",
        Bool,
    ),
    field(
        "Will you now or in the future require sponsorship for an employment visa?",
        Submission,
        "visa_sponsorship_required",
        Bool,
    ),
    field(
        "For us to get to know you better, please upload your resume here:",
        Submission,
        "resume_url",
        FileUrl,
    ),
];

/// Employer form: one company and up to three vacancies.
pub const JOB_SCHEMA: &[FieldMapping] = &[
    field("Your company", Company, "name", Text),
    field("Your industry", Company, "industry", List),
    field("Company Size", Company, "company_size", Text),
    field("Website", Company, "website", Text),
    field(
        "Feel free to share any details or context you'd like us to know in advance.",
        Company,
        "description",
        Text,
    ),
    field("Company Address", Company, "address", Text),
    field("City", Company, "city", Text),
    field("Country", Company, "country", Text),
    field("Postal Code", Company, "postal_code", Text),
    field("Contact Name", Company, "contact_name", Text),
    field("Contact Email", Company, "contact_email", Text),
    field("Contact Phone", Company, "contact_phone", Text),
    field("Your job title", Company, "contact_position", Text),
    field("Main vacancy (required)", JobPosting(1), "title", Text),
    field("Job Description", JobPosting(1), "description", Text),
    field(
        "Upload job description (PDF or Word) (1)",
        JobPosting(1),
        "description_url",
        FileUrl,
    ),
    field(
        "What technical competencies should candidates have?",
        JobPosting(1),
        "requirements",
        List,
    ),
    field("Responsibilities", JobPosting(1), "responsibilities", Text),
    field("Employment Type", JobPosting(1), "employment_type", Text),
    field("Experience Level", JobPosting(1), "experience_level", Text),
    field("Job Location", JobPosting(1), "location", Text),
    field("Remote Work Available", JobPosting(1), "remote_work", Bool),
    field("Salary Min", JobPosting(1), "salary_min", Decimal),
    field("Salary Max", JobPosting(1), "salary_max", Decimal),
    field("Currency", JobPosting(1), "salary_currency", Text),
    field("Second vacancy (optional)", JobPosting(2), "title", Text),
    field(
        "Upload job description (PDF or Word) (2)",
        JobPosting(2),
        "description_url",
        FileUrl,
    ),
    field("Third vacancy (optional)", JobPosting(3), "title", Text),
    field(
        "Upload job description (PDF or Word) (3)",
        JobPosting(3),
        "description_url",
        FileUrl,
    ),
];

/// Vacancy attributes the extra slots take from the main vacancy.
const INHERITED_POSTING_FIELDS: &[&str] = &[
    "employment_type",
    "experience_level",
    "location",
    "remote_work",
    "salary_min",
    "salary_max",
    "salary_currency",
    "description_url",
];

/// Attribute values grouped by target entity.
pub type MappedFields = BTreeMap<Target, Map<String, JsonValue>>;

/// Apply `schema` to a submission. Questions match a mapping by id or name;
/// unanswered questions are left out.
pub fn apply_schema(schema: &[FieldMapping], submission: &FormSubmission) -> MappedFields {
    let mut mapped = MappedFields::new();
    for mapping in schema {
        let Some(question) = submission
            .questions
            .iter()
            .find(|q| q.id == mapping.key || q.name == mapping.key)
        else {
            continue;
        };
        if let Some(value) = mapping.coercion.apply(&question.value) {
            mapped
                .entry(mapping.target)
                .or_default()
                .insert(mapping.attribute.to_string(), value);
        }
    }
    mapped
}

fn into_entity<T: serde::de::DeserializeOwned>(
    fields: Option<Map<String, JsonValue>>,
    what: &str,
) -> Result<T> {
    serde_json::from_value(JsonValue::Object(fields.unwrap_or_default()))
        .map_err(|e| Error::InvalidInput(format!("{} fields: {}", what, e)))
}

/// A mapped applicant submission.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedResume {
    pub candidate: NewCandidate,
    pub submission: NewSubmission,
}

/// A mapped employer submission.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedJob {
    pub company: NewCompany,
    /// Vacancies with a title, ordered by slot.
    pub postings: Vec<NewJobPosting>,
}

pub fn map_resume(submission: &FormSubmission) -> Result<MappedResume> {
    let mut mapped = apply_schema(RESUME_SCHEMA, submission);
    let candidate: NewCandidate = into_entity(mapped.remove(&Target::Candidate), "candidate")?;
    let mut record: NewSubmission =
        into_entity(mapped.remove(&Target::Submission), "submission")?;
    record.form_submission_id = submission.submission_id.clone();
    record.submitted_at = submission.submitted_at();
    record.last_updated = submission.last_updated_at();
    Ok(MappedResume {
        candidate,
        submission: record,
    })
}

pub fn map_job(submission: &FormSubmission) -> Result<MappedJob> {
    let mut mapped = apply_schema(JOB_SCHEMA, submission);
    let company: NewCompany = into_entity(mapped.remove(&Target::Company), "company")?;
    let main = mapped.get(&Target::JobPosting(1)).cloned().unwrap_or_default();

    let mut postings = Vec::new();
    for (target, mut fields) in mapped {
        let Target::JobPosting(slot) = target else {
            continue;
        };
        if slot > 1 {
            for key in INHERITED_POSTING_FIELDS {
                if !fields.contains_key(*key) {
                    if let Some(value) = main.get(*key) {
                        fields.insert(key.to_string(), value.clone());
                    }
                }
            }
            if let Some(description) = &company.description {
                fields
                    .entry("description")
                    .or_insert_with(|| JsonValue::String(description.clone()));
            }
        }
        let mut posting: NewJobPosting = into_entity(Some(fields), "job posting")?;
        if posting.title.is_none() {
            continue;
        }
        posting.form_submission_id = Some(submission.submission_id.clone());
        posting.vacancy_slot = i32::from(slot);
        posting.form_last_updated = submission.last_updated_at();
        postings.push(posting);
    }

    Ok(MappedJob { company, postings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_coercion() {
        assert_eq!(Text.apply(&json!("  Ada  ")), Some(json!("Ada")));
        assert_eq!(Text.apply(&json!("   ")), None);
        assert_eq!(Text.apply(&json!(["Remote", "Hybrid"])), Some(json!("Remote")));
        assert_eq!(Text.apply(&json!(5)), Some(json!("5")));
        assert_eq!(Text.apply(&JsonValue::Null), None);
    }

    #[test]
    fn test_list_coercion() {
        assert_eq!(
            List.apply(&json!(["Rust", "", "  Go ", null])),
            Some(json!("Rust, Go"))
        );
        assert_eq!(List.apply(&json!([])), None);
        assert_eq!(List.apply(&json!("Finance")), Some(json!("Finance")));
    }

    #[test]
    fn test_bool_coercion() {
        for yes in [json!(true), json!("Yes"), json!("on"), json!("1"), json!(["TRUE"])] {
            assert_eq!(Bool.apply(&yes), Some(json!(true)), "{}", yes);
        }
        for no in [json!(false), json!("No"), json!("maybe"), json!(0)] {
            assert_eq!(Bool.apply(&no), Some(json!(false)), "{}", no);
        }
        assert_eq!(Bool.apply(&JsonValue::Null), None);
    }

    #[test]
    fn test_numeric_coercions() {
        assert_eq!(Integer.apply(&json!(7)), Some(json!(7)));
        assert_eq!(Integer.apply(&json!("12+ years")), Some(json!(12)));
        assert_eq!(Integer.apply(&json!(3.9)), Some(json!(3)));
        assert_eq!(Integer.apply(&json!("several")), None);
        assert_eq!(Decimal.apply(&json!("$120,000")), Some(json!(120000.0)));
        assert_eq!(Decimal.apply(&json!(95000.5)), Some(json!(95000.5)));
        assert_eq!(Decimal.apply(&json!("n/a")), None);
    }

    #[test]
    fn test_file_url_and_address() {
        assert_eq!(
            FileUrl.apply(&json!([{"url": "https://cdn/cv.pdf", "filename": "cv.pdf"}])),
            Some(json!("https://cdn/cv.pdf"))
        );
        assert_eq!(
            FileUrl.apply(&json!({"url": "https://cdn/jd.docx"})),
            Some(json!("https://cdn/jd.docx"))
        );
        assert_eq!(FileUrl.apply(&json!("https://cdn/cv.pdf")), None);
        assert_eq!(FileUrl.apply(&json!([])), None);

        let address = json!({"address": "1 Main St", "city": "Austin", "zipCode": "73301"});
        assert_eq!(
            AddressPart(AddressField::ZipCode).apply(&address),
            Some(json!("73301"))
        );
        assert_eq!(AddressPart(AddressField::State).apply(&address), None);
    }

    #[test]
    fn test_job_schema_slots_are_contiguous() {
        let slots: std::collections::BTreeSet<u8> = JOB_SCHEMA
            .iter()
            .filter_map(|m| match m.target {
                JobPosting(slot) => Some(slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
