//! Management procedure surface (C8): `reset`, `soft_reset`, `ls`, `rm`,
//! `put`, `get`, `eval`, and the intentionally-unavailable `exec` /
//! webrepl pair. Gated entirely by `Config::enable_mgmt_api` — when
//! disabled, none of these names are registered, so `_dir` never lists
//! them and calling one yields the ordinary unknown-method error.

use crate::codec::Value;
use crate::error::ApplicationError;
use crate::registry::{FnHandler, Registry};
use std::path::{Path, PathBuf};

mod eval;

pub fn register(registry: &Registry, data_dir: PathBuf) {
    registry.register("reset", FnHandler(|_args, _kwargs| Ok(Value::Boolean(true))));
    registry.register(
        "soft_reset",
        FnHandler(|_args, _kwargs| Ok(Value::Boolean(true))),
    );

    {
        let data_dir = data_dir.clone();
        registry.register(
            "ls",
            FnHandler(move |args, _kwargs| {
                let path = arg_str(&args, 0, "path")?;
                let target = safe_path(&data_dir, &path)?;
                let entries = std::fs::read_dir(&target)
                    .map_err(|e| ApplicationError::new("OSError", e.to_string()))?;
                let names: Vec<Value> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| Value::String(e.file_name().to_string_lossy().into_owned().into()))
                    .collect();
                Ok(Value::Array(names))
            }),
        );
    }

    {
        let data_dir = data_dir.clone();
        registry.register(
            "rm",
            FnHandler(move |args, _kwargs| {
                let path = arg_str(&args, 0, "path")?;
                let target = safe_path(&data_dir, &path)?;
                std::fs::remove_file(&target)
                    .map_err(|e| ApplicationError::new("OSError", e.to_string()))?;
                Ok(Value::Nil)
            }),
        );
    }

    {
        let data_dir = data_dir.clone();
        registry.register(
            "put",
            FnHandler(move |args, _kwargs| {
                let path = arg_str(&args, 0, "path")?;
                let bytes = arg_bytes(&args, 1, "bytes")?;
                let target = safe_path(&data_dir, &path)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| ApplicationError::new("OSError", e.to_string()))?;
                }
                std::fs::write(&target, bytes)
                    .map_err(|e| ApplicationError::new("OSError", e.to_string()))?;
                Ok(Value::Nil)
            }),
        );
    }

    {
        let data_dir = data_dir.clone();
        registry.register(
            "get",
            FnHandler(move |args, _kwargs| {
                let path = arg_str(&args, 0, "path")?;
                let target = safe_path(&data_dir, &path)?;
                let bytes = std::fs::read(&target)
                    .map_err(|e| ApplicationError::new("OSError", e.to_string()))?;
                Ok(Value::Binary(bytes))
            }),
        );
    }

    registry.register(
        "eval",
        FnHandler(|args, _kwargs| {
            let expr = arg_str(&args, 0, "expr")?;
            eval::evaluate(&expr)
                .map(|n| Value::Integer(n.into()))
                .map_err(|e| ApplicationError::new("ValueError", e))
        }),
    );

    registry.register(
        "exec",
        FnHandler(|_args, _kwargs| {
            Err(ApplicationError::new(
                "NotImplementedError",
                "exec is disabled in this build",
            ))
        }),
    );

    registry.register(
        "start_webrepl",
        FnHandler(|_args, _kwargs| {
            Err(ApplicationError::new(
                "NotImplementedError",
                "webrepl is not part of this build",
            ))
        }),
    );
    registry.register(
        "stop_webrepl",
        FnHandler(|_args, _kwargs| {
            Err(ApplicationError::new(
                "NotImplementedError",
                "webrepl is not part of this build",
            ))
        }),
    );
}

/// Rejects absolute paths and `..` traversal; resolves relative to
/// `data_dir` without requiring the target to already exist.
fn safe_path(data_dir: &Path, requested: &str) -> Result<PathBuf, ApplicationError> {
    let requested = Path::new(requested);
    if requested.is_absolute() {
        return Err(ApplicationError::new("ValueError", "path must be relative"));
    }
    if requested
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ApplicationError::new(
            "ValueError",
            "path must not contain '..'",
        ));
    }
    Ok(data_dir.join(requested))
}

fn arg_str(args: &[Value], index: usize, name: &str) -> Result<String, ApplicationError> {
    args.get(index)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ApplicationError::new("TypeError", format!("missing argument: {name}")))
}

fn arg_bytes(args: &[Value], index: usize, name: &str) -> Result<Vec<u8>, ApplicationError> {
    match args.get(index) {
        Some(Value::Binary(b)) => Ok(b.clone()),
        Some(Value::String(s)) => Ok(s.as_str().unwrap_or_default().as_bytes().to_vec()),
        _ => Err(ApplicationError::new(
            "TypeError",
            format!("missing argument: {name}"),
        )),
    }
}
