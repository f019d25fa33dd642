use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct CourseQuery {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub course_id: String,
    #[serde(default)]
    pub terms_accepted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProgressUpdate {
    pub course_id: String,
    pub module_id: String,
    pub completed: bool,
}
