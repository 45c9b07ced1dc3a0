use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub paper_id: Uuid,
    pub title: String,
    pub authors: String,
    pub abstract_text: String,
    pub summary: Option<String>,
    pub main_page: String,
    pub pdf_url: String,
    pub is_visible: bool,
    pub topic_ids: Vec<Uuid>,
}
