use crate::domain::{TopicCode, TopicTree};
use crate::store::Store;
use crate::utils::e500;
use actix_web::http::header::ContentType;
use actix_web::{HttpResponse, get, web};
use anyhow::Context;
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize, Debug)]
pub struct TopicNode {
    pub topic_id: Uuid,
    pub name: String,
    pub code: TopicCode,
    pub subtopics: Vec<TopicNode>,
}

impl TopicNode {
    fn from_tree(tree: &TopicTree, topic_id: &Uuid) -> Option<Self> {
        let topic = tree.get(topic_id)?;

        Some(Self {
            topic_id: topic.topic_id,
            name: topic.name.clone(),
            code: topic.code.clone(),
            subtopics: tree
                .children(topic_id)
                .filter_map(|child| Self::from_tree(tree, &child.topic_id))
                .collect(),
        })
    }
}

#[get("/topics")]
#[tracing::instrument(name = "Retrieving topic tree", skip(store))]
pub async fn get(store: web::Data<dyn Store>) -> Result<HttpResponse, actix_web::Error> {
    let topics = store
        .topics()
        .await
        .context("Failed to fetch topics.")
        .map_err(e500)?;
    let tree = TopicTree::build(topics)
        .context("Stored topics do not form a tree.")
        .map_err(e500)?;
    let nodes: Vec<TopicNode> = tree
        .roots()
        .filter_map(|root| TopicNode::from_tree(&tree, &root.topic_id))
        .collect();

    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .json(nodes))
}
