//! The decoded RPC request/response tuples from §3: `[id, method, args,
//! kwargs]` and `[id, success, payload]`.

use crate::codec::Value;
use crate::error::{ApplicationError, CodecError};

#[derive(Debug, Clone)]
pub struct Request {
    pub id: i64,
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<(Value, Value)>,
}

impl Request {
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Integer(self.id.into()),
            Value::String(self.method.clone().into()),
            Value::Array(self.args.clone()),
            Value::Map(self.kwargs.clone()),
        ])
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let items = as_array(value, "request")?;
        let [id, method, args, kwargs]: [Value; 4] = items
            .try_into()
            .map_err(|_| CodecError::MalformedTuple("request tuple must have 4 elements".into()))?;

        let id = as_int(id, "request.id")?;
        let method = as_string(method, "request.method")?;
        let args = as_array(args, "request.args")?;
        let kwargs = as_map(kwargs, "request.kwargs")?;

        Ok(Self {
            id,
            method,
            args,
            kwargs,
        })
    }
}

#[derive(Debug, Clone)]
pub enum ResponsePayload {
    Success(Value),
    Error(ApplicationError),
}

#[derive(Debug, Clone)]
pub struct Response {
    pub id: i64,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn success(id: i64, value: Value) -> Self {
        Self {
            id,
            payload: ResponsePayload::Success(value),
        }
    }

    pub fn error(id: i64, err: ApplicationError) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(err),
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.payload {
            ResponsePayload::Success(v) => Value::Array(vec![
                Value::Integer(self.id.into()),
                Value::Boolean(true),
                v.clone(),
            ]),
            ResponsePayload::Error(e) => Value::Array(vec![
                Value::Integer(self.id.into()),
                Value::Boolean(false),
                Value::Array(vec![
                    Value::String(e.name.clone().into()),
                    Value::String(e.message.clone().into()),
                ]),
            ]),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let items = as_array(value, "response")?;
        let [id, success, payload]: [Value; 3] = items
            .try_into()
            .map_err(|_| CodecError::MalformedTuple("response tuple must have 3 elements".into()))?;

        let id = as_int(id, "response.id")?;
        let success = match success {
            Value::Boolean(b) => b,
            other => {
                return Err(CodecError::MalformedTuple(format!(
                    "response.success must be a bool, got {other:?}"
                )))
            }
        };

        let payload = if success {
            ResponsePayload::Success(payload)
        } else {
            let mut parts = as_array(payload, "response.payload")?;
            if parts.len() != 2 {
                return Err(CodecError::MalformedTuple(
                    "error payload must be [name, message]".into(),
                ));
            }
            let message = as_string(parts.pop().unwrap(), "response.payload.message")?;
            let name = as_string(parts.pop().unwrap(), "response.payload.name")?;
            ResponsePayload::Error(ApplicationError::new(name, message))
        };

        Ok(Self { id, payload })
    }
}

fn as_array(value: Value, field: &str) -> Result<Vec<Value>, CodecError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(CodecError::MalformedTuple(format!(
            "{field} must be an array, got {other:?}"
        ))),
    }
}

fn as_map(value: Value, field: &str) -> Result<Vec<(Value, Value)>, CodecError> {
    match value {
        Value::Map(entries) => Ok(entries),
        other => Err(CodecError::MalformedTuple(format!(
            "{field} must be a map, got {other:?}"
        ))),
    }
}

fn as_int(value: Value, field: &str) -> Result<i64, CodecError> {
    value
        .as_i64()
        .ok_or_else(|| CodecError::MalformedTuple(format!("{field} must be an integer")))
}

fn as_string(value: Value, field: &str) -> Result<String, CodecError> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| CodecError::MalformedTuple(format!("{field} must be a string")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let req = Request {
            id: 7,
            method: "add".into(),
            args: vec![Value::Integer(2.into()), Value::Integer(3.into())],
            kwargs: vec![],
        };
        let v = req.to_value();
        let back = Request::from_value(v).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.method, "add");
        assert_eq!(back.args.len(), 2);
    }

    #[test]
    fn success_response_round_trips() {
        let resp = Response::success(1, Value::Integer(5.into()));
        let v = resp.to_value();
        let back = Response::from_value(v).unwrap();
        assert_eq!(back.id, 1);
        assert!(matches!(back.payload, ResponsePayload::Success(Value::Integer(_))));
    }

    #[test]
    fn error_response_round_trips() {
        let resp = Response::error(2, ApplicationError::new("ValueError", "bad"));
        let v = resp.to_value();
        let back = Response::from_value(v).unwrap();
        match back.payload {
            ResponsePayload::Error(e) => {
                assert_eq!(e.name, "ValueError");
                assert_eq!(e.message, "bad");
            }
            _ => panic!("expected error payload"),
        }
    }

    #[test]
    fn malformed_request_tuple_is_rejected() {
        let v = Value::Array(vec![Value::Integer(1.into())]);
        assert!(Request::from_value(v).is_err());
    }
}
