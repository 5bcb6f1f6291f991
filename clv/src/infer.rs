use crate::Value;

/// Register that receives the result of `INFER`.
pub const INFERENCE_REGISTER: &str = "inference_result";

/// Backend for the `INFER` instruction. The engine treats it as an opaque
/// call: words in, one value out.
pub trait Inference: Send + Sync {
    fn infer(&self, payload: &str) -> Value;
}

/// Default backend, echoes the payload back as text.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoInference;

impl Inference for EchoInference {
    fn infer(&self, payload: &str) -> Value {
        Value::Text(format!("inference result based on {payload}"))
    }
}

impl<F> Inference for F
where
    F: Fn(&str) -> Value + Send + Sync,
{
    fn infer(&self, payload: &str) -> Value {
        self(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo() {
        assert_eq!(
            EchoInference.infer("sensor data"),
            Value::Text("inference result based on sensor data".into())
        );
    }

    #[test]
    fn test_closure_backend() {
        let backend = |payload: &str| Value::Integer(payload.len() as i64);
        assert_eq!(backend.infer("abc"), Value::Integer(3));
    }
}
