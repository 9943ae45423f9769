use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenaiModelList {
    pub object: String,
    pub data: Vec<OpenaiModel>,
}

impl Default for OpenaiModelList {
    fn default() -> Self {
        Self {
            object: "list".to_string(),
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenaiModel {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

impl Default for OpenaiModel {
    fn default() -> Self {
        Self {
            id: String::new(),
            object: "model".to_string(),
            owned_by: String::new(),
        }
    }
}

impl OpenaiModelList {
    pub fn from_model_names<I, S>(models_list: I, owned_by: String) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let data = models_list
            .into_iter()
            .map(|model| OpenaiModel {
                id: model.into(),
                owned_by: owned_by.clone(),
                ..Default::default()
            })
            .collect();

        Self {
            data,
            ..Default::default()
        }
    }
}
