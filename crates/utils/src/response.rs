use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Envelope returned by every `/api` route
#[derive(Debug, Serialize, Deserialize, TS)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Creates a successful response, with `data` and no message.
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Creates an error response, with `message` and no data.
    pub fn error(message: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            message: Some(message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_shape() {
        let response = ApiResponse::<()>::error("Task not found");
        assert!(!response.is_success());
        assert_eq!(response.message(), Some("Task not found"));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "success": false,
                "data": null,
                "message": "Task not found"
            })
        );
    }

    #[test]
    fn test_success_carries_data() {
        let response = ApiResponse::<Vec<u32>>::success(vec![1, 3, 5]);
        assert!(response.is_success());
        assert_eq!(response.into_data(), Some(vec![1, 3, 5]));
    }
}
