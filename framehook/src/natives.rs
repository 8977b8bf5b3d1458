use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngExt;

use crate::{Object, Value};

/// `Ok` is the returned value, `Err` the raised one.
pub type NativeFunction = fn(&[Value]) -> Result<Value, Value>;

#[derive(Debug)]
pub struct Native {
    pub name: &'static str,
    pub arity: usize,
    pub ptr: NativeFunction,
}

impl Native {
    pub const fn new(name: &'static str, arity: usize, ptr: NativeFunction) -> Self {
        Self { name, arity, ptr }
    }
}

pub static NATIVES: &[Native] = &[
    Native::new("print", 1, print),
    Native::new("clock", 0, clock),
    Native::new("random", 0, random),
    Native::new("len", 1, len),
    Native::new("concat", 2, concat),
    Native::new("fail", 1, fail),
];

#[must_use]
pub fn find_native(name: &str) -> Option<&'static Native> {
    NATIVES.iter().find(|native| native.name == name)
}

pub(crate) fn type_error(message: impl AsRef<str>) -> Value {
    Value::string(format!("TypeError: {}", message.as_ref()))
}

fn print(args: &[Value]) -> Result<Value, Value> {
    println!("{}", args[0]);
    Ok(Value::nil())
}

fn clock(_args: &[Value]) -> Result<Value, Value> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| Value::string(format!("ClockError: {err}")))?
        .as_millis();
    Ok(Value::fixnum(i64::try_from(millis).unwrap_or(i64::MAX)))
}

/// Uniform fixnum in `0..1_000_000`.
fn random(_args: &[Value]) -> Result<Value, Value> {
    let mut rng = rand::rng();
    Ok(Value::fixnum(rng.random_range(0..1_000_000)))
}

fn len(args: &[Value]) -> Result<Value, Value> {
    match args[0].object() {
        Object::Str(value) => Ok(Value::fixnum(value.chars().count() as i64)),
        _ => Err(type_error(format!("len of {}", args[0].type_name()))),
    }
}

fn concat(args: &[Value]) -> Result<Value, Value> {
    match (args[0].object(), args[1].object()) {
        (Object::Str(a), Object::Str(b)) => Ok(Value::string(format!("{a}{b}"))),
        _ => Err(type_error(format!(
            "concat of {} and {}",
            args[0].type_name(),
            args[1].type_name()
        ))),
    }
}

fn fail(args: &[Value]) -> Result<Value, Value> {
    Err(args[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natives_are_found_by_name() {
        let native = find_native("concat").unwrap();
        assert_eq!(native.arity, 2);
        assert!(find_native("nope").is_none());
    }

    #[test]
    fn concat_and_len() {
        let joined = (find_native("concat").unwrap().ptr)(&[
            Value::string("ab"),
            Value::string("cd"),
        ])
        .unwrap();
        assert_eq!(joined, Value::string("abcd"));
        let length = (find_native("len").unwrap().ptr)(&[joined]).unwrap();
        assert_eq!(length, Value::fixnum(4));
    }

    #[test]
    fn type_errors_are_raised_values() {
        let raised = (find_native("len").unwrap().ptr)(&[Value::fixnum(1)]).unwrap_err();
        assert_eq!(raised.as_str(), Some("TypeError: len of fixnum"));
    }

    #[test]
    fn random_stays_in_range() {
        let random = find_native("random").unwrap();
        for _ in 0..100 {
            let value = (random.ptr)(&[]).unwrap().as_fixnum().unwrap();
            assert!((0..1_000_000).contains(&value));
        }
    }

    #[test]
    fn fail_raises_its_argument() {
        let reason = Value::string("boom");
        let raised = (find_native("fail").unwrap().ptr)(&[reason.clone()]).unwrap_err();
        assert!(raised.same(&reason));
    }
}
