use serde::{Deserialize, Serialize};

/// A downloadable model for the local inference engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub name: String,
    pub url: String,
    pub filename: String,
    pub size_bytes: Option<u64>,
}

const CATALOG: &[(&str, &str, &str, &str, u64)] = &[
    (
        "qwen2.5-0.5b-instruct",
        "Qwen 2.5 0.5B Instruct",
        "https://huggingface.co/Qwen/Qwen2.5-0.5B-Instruct-GGUF/resolve/main/qwen2.5-0.5b-instruct-q4_k_m.gguf",
        "qwen2.5-0.5b-instruct-q4_k_m.gguf",
        491_400_032,
    ),
    (
        "llama-3.2-1b-instruct",
        "Llama 3.2 1B Instruct",
        "https://huggingface.co/bartowski/Llama-3.2-1B-Instruct-GGUF/resolve/main/Llama-3.2-1B-Instruct-Q4_K_M.gguf",
        "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
        807_694_464,
    ),
    (
        "qwen3-1.7b",
        "Qwen3 1.7B",
        "https://huggingface.co/Qwen/Qwen3-1.7B-GGUF/resolve/main/Qwen3-1.7B-Q8_0.gguf",
        "Qwen3-1.7B-Q8_0.gguf",
        1_834_426_016,
    ),
];

pub const DEFAULT_LOCAL_MODEL: &str = "qwen2.5-0.5b-instruct";

pub fn catalog() -> Vec<ModelSpec> {
    CATALOG
        .iter()
        .map(|(id, name, url, filename, size)| ModelSpec {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            filename: filename.to_string(),
            size_bytes: Some(*size),
        })
        .collect()
}

pub fn find_model(id: &str) -> Option<ModelSpec> {
    catalog().into_iter().find(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_is_in_catalog() {
        assert!(find_model(DEFAULT_LOCAL_MODEL).is_some());
        assert!(find_model("does-not-exist").is_none());
    }
}
