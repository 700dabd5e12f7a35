//! The `std` object.
//!
//! Each builtin is a plain function over already-forced arguments; optional
//! parameters that the caller left out arrive as `null`. Functions passed in
//! (to `std.map`, `std.sort` and so on) are called back through the
//! evaluator.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::rc::Rc;

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use super::ast::Visibility;
use super::error::{EvalError, EvalResult};
use super::eval::{runtime, Evaluator};
use super::value::{Builtin, BuiltinFn, FieldBody, Layer, LayerField, ObjectValue, Value};

const fn builtin(name: &'static str, params: &'static [&'static str], run: BuiltinFn) -> Builtin {
    Builtin {
        name,
        params,
        required: params.len(),
        run,
    }
}

const fn optional(
    name: &'static str,
    params: &'static [&'static str],
    required: usize,
    run: BuiltinFn,
) -> Builtin {
    Builtin {
        name,
        params,
        required,
        run,
    }
}

static BUILTINS: &[Builtin] = &[
    // Types and objects
    builtin("length", &["x"], length),
    builtin("type", &["x"], type_of),
    builtin("isString", &["v"], |_, a| Ok(Value::Bool(matches!(a[0], Value::Str(_))))),
    builtin("isNumber", &["v"], |_, a| Ok(Value::Bool(matches!(a[0], Value::Number(_))))),
    builtin("isBoolean", &["v"], |_, a| Ok(Value::Bool(matches!(a[0], Value::Bool(_))))),
    builtin("isObject", &["v"], |_, a| Ok(Value::Bool(matches!(a[0], Value::Object(_))))),
    builtin("isArray", &["v"], |_, a| Ok(Value::Bool(matches!(a[0], Value::Array(_))))),
    builtin("isFunction", &["v"], |_, a| {
        Ok(Value::Bool(matches!(a[0], Value::Function(_) | Value::Builtin(_))))
    }),
    builtin("objectFields", &["o"], |_, a| object_fields("objectFields", &a[0], false)),
    builtin("objectFieldsAll", &["o"], |_, a| object_fields("objectFieldsAll", &a[0], true)),
    builtin("objectHas", &["o", "f"], |_, a| {
        Ok(Value::Bool(object("objectHas", &a[0])?.has_field(&string("objectHas", &a[1])?, false)))
    }),
    builtin("objectHasAll", &["o", "f"], |_, a| {
        Ok(Value::Bool(object("objectHasAll", &a[0])?.has_field(&string("objectHasAll", &a[1])?, true)))
    }),
    builtin("objectValues", &["o"], object_values),
    optional("get", &["o", "f", "default", "inc_hidden"], 2, get),
    // Arrays and higher-order functions
    builtin("map", &["func", "arr"], map),
    builtin("mapWithIndex", &["func", "arr"], map_with_index),
    builtin("filter", &["func", "arr"], filter),
    builtin("flatMap", &["func", "arr"], flat_map),
    builtin("foldl", &["func", "arr", "init"], foldl),
    builtin("foldr", &["func", "arr", "init"], foldr),
    builtin("makeArray", &["sz", "func"], make_array),
    builtin("range", &["from", "to"], range),
    builtin("join", &["sep", "arr"], join),
    builtin("member", &["arr", "x"], member),
    builtin("contains", &["arr", "elem"], member),
    builtin("count", &["arr", "x"], count),
    builtin("reverse", &["arr"], |_, a| {
        let mut items = array("reverse", &a[0])?.to_vec();
        items.reverse();
        Ok(Value::array(items))
    }),
    optional("sort", &["arr", "keyF"], 1, |ev, a| Ok(Value::array(sorted(ev, "sort", &a[0], &a[1])?))),
    optional("uniq", &["arr", "keyF"], 1, |ev, a| {
        let items = array("uniq", &a[0])?.to_vec();
        Ok(Value::array(dedup(ev, items, &a[1])?))
    }),
    optional("set", &["arr", "keyF"], 1, |ev, a| {
        let items = sorted(ev, "set", &a[0], &a[1])?;
        Ok(Value::array(dedup(ev, items, &a[1])?))
    }),
    builtin("flattenArrays", &["arrs"], flatten_arrays),
    // Strings
    builtin("toString", &["a"], |ev, a| Ok(Value::string(ev.to_text(&a[0])?))),
    builtin("format", &["str", "vals"], |ev, a| {
        Ok(Value::string(format(ev, &string("format", &a[0])?, &a[1])?))
    }),
    builtin("split", &["str", "c"], split),
    builtin("strReplace", &["str", "from", "to"], str_replace),
    builtin("startsWith", &["a", "b"], |_, a| {
        Ok(Value::Bool(string("startsWith", &a[0])?.starts_with(&*string("startsWith", &a[1])?)))
    }),
    builtin("endsWith", &["a", "b"], |_, a| {
        Ok(Value::Bool(string("endsWith", &a[0])?.ends_with(&*string("endsWith", &a[1])?)))
    }),
    builtin("substr", &["str", "from", "len"], substr),
    builtin("stringChars", &["str"], |_, a| {
        Ok(Value::array(chars(&string("stringChars", &a[0])?)))
    }),
    builtin("asciiUpper", &["str"], |_, a| {
        Ok(Value::string(string("asciiUpper", &a[0])?.to_ascii_uppercase()))
    }),
    builtin("asciiLower", &["str"], |_, a| {
        Ok(Value::string(string("asciiLower", &a[0])?.to_ascii_lowercase()))
    }),
    builtin("trim", &["str"], |_, a| Ok(Value::string(string("trim", &a[0])?.trim()))),
    builtin("isEmpty", &["str"], |_, a| Ok(Value::Bool(string("isEmpty", &a[0])?.is_empty()))),
    builtin("parseInt", &["str"], parse_int),
    builtin("parseJson", &["str"], |_, a| {
        let text = string("parseJson", &a[0])?;
        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| runtime(format!("std.parseJson: {e}")))?;
        Ok(from_json(json))
    }),
    builtin("char", &["n"], |_, a| {
        let n = number("char", &a[0])?;
        char::from_u32(n as u32)
            .filter(|_| n >= 0.0)
            .map(|c| Value::string(c.to_string()))
            .ok_or_else(|| runtime(format!("std.char: invalid codepoint {n}")))
    }),
    builtin("codepoint", &["str"], |_, a| {
        let s = string("codepoint", &a[0])?;
        let mut it = s.chars();
        match (it.next(), it.next()) {
            (Some(c), None) => Ok(Value::Number(f64::from(u32::from(c)))),
            _ => Err(runtime("std.codepoint: expected a single character")),
        }
    }),
    builtin("lines", &["arr"], |ev, a| {
        let mut out = String::new();
        for line in array("lines", &a[0])?.iter() {
            out.push_str(&ev.to_text(line)?);
            out.push('\n');
        }
        Ok(Value::string(out))
    }),
    // Math
    builtin("abs", &["n"], |_, a| Ok(Value::Number(number("abs", &a[0])?.abs()))),
    builtin("max", &["a", "b"], |_, a| Ok(Value::Number(number("max", &a[0])?.max(number("max", &a[1])?)))),
    builtin("min", &["a", "b"], |_, a| Ok(Value::Number(number("min", &a[0])?.min(number("min", &a[1])?)))),
    builtin("floor", &["x"], |_, a| Ok(Value::Number(number("floor", &a[0])?.floor()))),
    builtin("ceil", &["x"], |_, a| Ok(Value::Number(number("ceil", &a[0])?.ceil()))),
    builtin("pow", &["x", "n"], |_, a| Ok(Value::Number(number("pow", &a[0])?.powf(number("pow", &a[1])?)))),
    builtin("sqrt", &["x"], |_, a| Ok(Value::Number(number("sqrt", &a[0])?.sqrt()))),
    // JSON and checks
    builtin("mergePatch", &["target", "patch"], |ev, a| merge_patch(ev, &a[0], &a[1])),
    builtin("manifestJson", &["value"], |ev, a| {
        Ok(Value::string(pretty(&ev.manifest(&a[0])?, "    ")?))
    }),
    builtin("manifestJsonEx", &["value", "indent"], |ev, a| {
        let indent = string("manifestJsonEx", &a[1])?;
        Ok(Value::string(pretty(&ev.manifest(&a[0])?, &indent)?))
    }),
    builtin("assertEqual", &["a", "b"], |ev, a| {
        if ev.equals(&a[0], &a[1])? {
            return Ok(Value::Bool(true));
        }
        Err(runtime(format!(
            "Assertion failed. {} != {}",
            ev.to_text(&a[0])?,
            ev.to_text(&a[1])?
        )))
    }),
    builtin("extVar", &["x"], |_, a| {
        Err(runtime(format!("undefined external variable: {}", string("extVar", &a[0])?)))
    }),
];

/// The object bound to `std` in every document. Its fields are hidden.
pub(super) fn std_object() -> Value {
    let fields = BUILTINS
        .iter()
        .map(|b| {
            (
                b.name.to_owned(),
                LayerField {
                    visibility: Visibility::Hidden,
                    plus: false,
                    body: FieldBody::Value(Value::Builtin(b)),
                },
            )
        })
        .collect();
    let layer = Layer {
        fields,
        locals: Rc::from([]),
    };
    Value::Object(Rc::new(ObjectValue::new(vec![Rc::new(layer)])))
}

// =============================================================================
// Argument helpers
// =============================================================================

fn type_error(func: &str, expected: &str, got: &Value) -> EvalError {
    runtime(format!("std.{func}: expected {expected}, got {}", got.type_name()))
}

fn number(func: &str, value: &Value) -> EvalResult<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(type_error(func, "number", other)),
    }
}

fn string(func: &str, value: &Value) -> EvalResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(Rc::clone(s)),
        other => Err(type_error(func, "string", other)),
    }
}

fn array(func: &str, value: &Value) -> EvalResult<Rc<Vec<Value>>> {
    match value {
        Value::Array(items) => Ok(Rc::clone(items)),
        other => Err(type_error(func, "array", other)),
    }
}

fn object(func: &str, value: &Value) -> EvalResult<Rc<ObjectValue>> {
    match value {
        Value::Object(o) => Ok(Rc::clone(o)),
        other => Err(type_error(func, "object", other)),
    }
}

/// Arrays as they are; strings as arrays of one-character strings.
fn sequence(func: &str, value: &Value) -> EvalResult<Rc<Vec<Value>>> {
    match value {
        Value::Str(s) => Ok(Rc::new(chars(s))),
        other => array(func, other),
    }
}

fn chars(s: &str) -> Vec<Value> {
    s.chars().map(|c| Value::string(c.to_string())).collect()
}

fn integer(func: &str, value: &Value) -> EvalResult<i64> {
    let n = number(func, value)?;
    if n.fract() != 0.0 {
        return Err(runtime(format!("std.{func}: expected integer, got {n}")));
    }
    Ok(n as i64)
}

// =============================================================================
// Types and objects
// =============================================================================

fn length(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(o) => o.field_names(false).len(),
        Value::Function(f) => f.params.len(),
        Value::Builtin(b) => b.params.len(),
        other => return Err(type_error("length", "string, array, object or function", other)),
    };
    Ok(Value::Number(n as f64))
}

fn type_of(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::string(args[0].type_name()))
}

fn object_fields(func: &str, value: &Value, include_hidden: bool) -> EvalResult<Value> {
    let names = object(func, value)?.field_names(include_hidden);
    Ok(Value::array(names.into_iter().map(Value::string).collect()))
}

fn object_values(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let o = object("objectValues", &args[0])?;
    let mut values = Vec::new();
    for name in o.field_names(false) {
        if let Some(value) = ev.field(&o, &name)? {
            values.push(value);
        }
    }
    Ok(Value::array(values))
}

fn get(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let o = object("get", &args[0])?;
    let name = string("get", &args[1])?;
    let include_hidden = match &args[3] {
        Value::Null => true,
        Value::Bool(b) => *b,
        other => return Err(type_error("get", "boolean", other)),
    };
    if !o.has_field(&name, include_hidden) {
        return Ok(args[2].clone());
    }
    Ok(ev.field(&o, &name)?.unwrap_or_else(|| args[2].clone()))
}

// =============================================================================
// Arrays
// =============================================================================

fn map(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let items = sequence("map", &args[1])?;
    let out = items
        .iter()
        .map(|item| ev.call_function(&args[0], std::slice::from_ref(item)))
        .collect::<EvalResult<Vec<_>>>()?;
    Ok(Value::array(out))
}

fn map_with_index(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let items = sequence("mapWithIndex", &args[1])?;
    let out = items
        .iter()
        .enumerate()
        .map(|(i, item)| ev.call_function(&args[0], &[Value::Number(i as f64), item.clone()]))
        .collect::<EvalResult<Vec<_>>>()?;
    Ok(Value::array(out))
}

fn filter(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let mut out = Vec::new();
    for item in array("filter", &args[1])?.iter() {
        match ev.call_function(&args[0], std::slice::from_ref(item))? {
            Value::Bool(true) => out.push(item.clone()),
            Value::Bool(false) => {}
            other => return Err(type_error("filter", "boolean from the predicate", &other)),
        }
    }
    Ok(Value::array(out))
}

fn flat_map(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let Value::Str(s) = &args[1] {
        let mut out = String::new();
        for c in chars(s) {
            match ev.call_function(&args[0], &[c])? {
                Value::Str(part) => out.push_str(&part),
                Value::Null => {}
                other => return Err(type_error("flatMap", "string from the function", &other)),
            }
        }
        return Ok(Value::string(out));
    }

    let mut out = Vec::new();
    for item in array("flatMap", &args[1])?.iter() {
        match ev.call_function(&args[0], std::slice::from_ref(item))? {
            Value::Array(part) => out.extend(part.iter().cloned()),
            Value::Null => {}
            other => return Err(type_error("flatMap", "array from the function", &other)),
        }
    }
    Ok(Value::array(out))
}

fn foldl(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let mut acc = args[2].clone();
    for item in sequence("foldl", &args[1])?.iter() {
        acc = ev.call_function(&args[0], &[acc, item.clone()])?;
    }
    Ok(acc)
}

fn foldr(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let mut acc = args[2].clone();
    for item in sequence("foldr", &args[1])?.iter().rev() {
        acc = ev.call_function(&args[0], &[item.clone(), acc])?;
    }
    Ok(acc)
}

fn make_array(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let size = integer("makeArray", &args[0])?;
    if size < 0 {
        return Err(runtime(format!("std.makeArray: size must be non-negative, got {size}")));
    }
    let out = (0..size)
        .map(|i| ev.call_function(&args[1], &[Value::Number(i as f64)]))
        .collect::<EvalResult<Vec<_>>>()?;
    Ok(Value::array(out))
}

fn range(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let from = integer("range", &args[0])?;
    let to = integer("range", &args[1])?;
    Ok(Value::array((from..=to).map(|i| Value::Number(i as f64)).collect()))
}

fn join(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let items = array("join", &args[1])?;
    let mut first = true;
    match &args[0] {
        Value::Str(sep) => {
            let mut out = String::new();
            for item in items.iter() {
                match item {
                    Value::Null => continue,
                    Value::Str(s) => {
                        if !first {
                            out.push_str(sep);
                        }
                        out.push_str(s);
                    }
                    other => return Err(type_error("join", "string elements", other)),
                }
                first = false;
            }
            Ok(Value::string(out))
        }
        Value::Array(sep) => {
            let mut out = Vec::new();
            for item in items.iter() {
                match item {
                    Value::Null => continue,
                    Value::Array(part) => {
                        if !first {
                            out.extend(sep.iter().cloned());
                        }
                        out.extend(part.iter().cloned());
                    }
                    other => return Err(type_error("join", "array elements", other)),
                }
                first = false;
            }
            Ok(Value::array(out))
        }
        other => Err(type_error("join", "string or array separator", other)),
    }
}

fn member(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let (Value::Str(s), Value::Str(x)) = (&args[0], &args[1]) {
        return Ok(Value::Bool(s.contains(&**x)));
    }
    for item in sequence("member", &args[0])?.iter() {
        if ev.equals(item, &args[1])? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn count(ev: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let mut n = 0u32;
    for item in array("count", &args[0])?.iter() {
        if ev.equals(item, &args[1])? {
            n += 1;
        }
    }
    Ok(Value::Number(f64::from(n)))
}

fn flatten_arrays(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let mut out = Vec::new();
    for item in array("flattenArrays", &args[0])?.iter() {
        match item {
            Value::Array(part) => out.extend(part.iter().cloned()),
            Value::Null => {}
            other => return Err(type_error("flattenArrays", "array elements", other)),
        }
    }
    Ok(Value::array(out))
}

fn key_of(ev: &Evaluator<'_>, key_f: &Value, item: &Value) -> EvalResult<Value> {
    match key_f {
        Value::Null => Ok(item.clone()),
        f => ev.call_function(f, std::slice::from_ref(item)),
    }
}

fn order(func: &str, a: &Value, b: &Value) -> EvalResult<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x.partial_cmp(y).unwrap_or(Ordering::Equal)),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => Err(runtime(format!(
            "std.{func}: cannot compare {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Stable sort by key; keys must be all numbers or all strings.
fn sorted(ev: &Evaluator<'_>, func: &str, arr: &Value, key_f: &Value) -> EvalResult<Vec<Value>> {
    let items = array(func, arr)?;
    let mut keyed = items
        .iter()
        .map(|item| Ok((key_of(ev, key_f, item)?, item.clone())))
        .collect::<EvalResult<Vec<_>>>()?;

    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        order(func, a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

/// Drop consecutive items whose keys are equal.
fn dedup(ev: &Evaluator<'_>, items: Vec<Value>, key_f: &Value) -> EvalResult<Vec<Value>> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    let mut last_key: Option<Value> = None;
    for item in items {
        let key = key_of(ev, key_f, &item)?;
        if let Some(last) = &last_key
            && ev.equals(last, &key)?
        {
            continue;
        }
        last_key = Some(key);
        out.push(item);
    }
    Ok(out)
}

// =============================================================================
// Strings
// =============================================================================

fn split(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let s = string("split", &args[0])?;
    let c = string("split", &args[1])?;
    if c.is_empty() {
        return Err(runtime("std.split: separator must not be empty"));
    }
    Ok(Value::array(s.split(&*c).map(Value::string).collect()))
}

fn str_replace(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let s = string("strReplace", &args[0])?;
    let from = string("strReplace", &args[1])?;
    let to = string("strReplace", &args[2])?;
    if from.is_empty() {
        return Err(runtime("std.strReplace: 'from' string must not be empty"));
    }
    Ok(Value::string(s.replace(&*from, &to)))
}

fn substr(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let s = string("substr", &args[0])?;
    let from = integer("substr", &args[1])?;
    let len = integer("substr", &args[2])?;
    if from < 0 || len < 0 {
        return Err(runtime("std.substr: from and len must be non-negative"));
    }
    Ok(Value::string(
        s.chars().skip(from as usize).take(len as usize).collect::<String>(),
    ))
}

fn parse_int(_: &Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let s = string("parseInt", &args[0])?;
    s.parse::<i64>()
        .map(|n| Value::Number(n as f64))
        .map_err(|_| runtime(format!("std.parseInt: {s:?} is not a base 10 integer")))
}

/// `%`-style formatting. `values` is an array for positional conversions,
/// an object for `%(name)s`, or a single value.
pub(super) fn format(ev: &Evaluator<'_>, fmt: &str, values: &Value) -> EvalResult<String> {
    let positional: Vec<Value> = match values {
        Value::Array(items) => items.to_vec(),
        Value::Object(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mut next = positional.iter();
    let mut out = String::new();
    let mut it = fmt.chars().peekable();

    while let Some(c) = it.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if it.next_if_eq(&'%').is_some() {
            out.push('%');
            continue;
        }

        let value = if it.next_if_eq(&'(').is_some() {
            let name: String = it.by_ref().take_while(|c| *c != ')').collect();
            let Value::Object(o) = values else {
                return Err(runtime("format: named conversion requires an object"));
            };
            ev.field(o, &name)?
                .ok_or_else(|| runtime(format!("format: no such field: {name}")))?
        } else {
            next.next()
                .cloned()
                .ok_or_else(|| runtime("format: not enough values"))?
        };

        let mut left = false;
        let mut zero = false;
        while let Some(flag) = it.next_if(|c| matches!(c, '-' | '0' | '+' | ' ' | '#')) {
            match flag {
                '-' => left = true,
                '0' => zero = true,
                _ => {}
            }
        }
        let mut width = 0;
        while let Some(d) = it.next_if(char::is_ascii_digit) {
            width = width * 10 + d.to_digit(10).map_or(0, |d| d as usize);
        }
        let mut precision = None;
        if it.next_if_eq(&'.').is_some() {
            let mut p = 0;
            while let Some(d) = it.next_if(char::is_ascii_digit) {
                p = p * 10 + d.to_digit(10).map_or(0, |d| d as usize);
            }
            precision = Some(p);
        }

        let conversion = it.next().ok_or_else(|| runtime("format: truncated format code"))?;
        let text = match conversion {
            's' => ev.to_text(&value)?,
            'd' | 'i' => format!("{}", number("format", &value)?.trunc() as i64),
            'f' | 'F' => format!("{:.*}", precision.unwrap_or(6), number("format", &value)?),
            'x' => format!("{:x}", number("format", &value)?.trunc() as i64),
            'X' => format!("{:X}", number("format", &value)?.trunc() as i64),
            'o' => format!("{:o}", number("format", &value)?.trunc() as i64),
            other => return Err(runtime(format!("format: unrecognised conversion type: {other}"))),
        };

        let pad = width.saturating_sub(text.chars().count());
        if left {
            out.push_str(&text);
            out.extend(std::iter::repeat_n(' ', pad));
        } else if zero && conversion != 's' {
            let (sign, digits) = match text.strip_prefix('-') {
                Some(digits) => ("-", digits),
                None => ("", text.as_str()),
            };
            out.push_str(sign);
            out.extend(std::iter::repeat_n('0', pad));
            out.push_str(digits);
        } else {
            out.extend(std::iter::repeat_n(' ', pad));
            out.push_str(&text);
        }
    }

    if next.next().is_some() {
        return Err(runtime(format!(
            "format: too many values to format: {}",
            positional.len()
        )));
    }
    Ok(out)
}

// =============================================================================
// JSON
// =============================================================================

/// Single-line JSON as `std.toString` prints it: `{"a": [1, 2]}`.
pub(super) fn inline_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_inline(&mut out, value);
    out
}

fn write_inline(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Array(items) if items.is_empty() => out.push_str("[ ]"),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_inline(out, item);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) if map.is_empty() => out.push_str("{ }"),
        serde_json::Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: ", serde_json::Value::String(key.clone()));
                write_inline(out, item);
            }
            out.push('}');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn pretty(value: &serde_json::Value, indent: &str) -> EvalResult<String> {
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
    value
        .serialize(&mut serializer)
        .map_err(|e| runtime(format!("manifestJson: {e}")))?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

pub(super) fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => Value::array(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::Object(Rc::new(ObjectValue::from_values(
            map.into_iter().map(|(k, v)| (k, from_json(v))),
        ))),
    }
}

/// RFC 7386 merge of `patch` into `target`.
fn merge_patch(ev: &Evaluator<'_>, target: &Value, patch: &Value) -> EvalResult<Value> {
    let _level = ev.descend()?;
    let Value::Object(patch) = patch else {
        return Ok(patch.clone());
    };

    let mut merged: Vec<(String, Value)> = Vec::new();
    if let Value::Object(target) = target {
        for name in target.field_names(false) {
            if let Some(value) = ev.field(target, &name)? {
                merged.push((name, value));
            }
        }
    }

    for name in patch.field_names(false) {
        let Some(update) = ev.field(patch, &name)? else {
            continue;
        };
        let existing = merged.iter().position(|(k, _)| *k == name);
        if matches!(update, Value::Null) {
            if let Some(i) = existing {
                merged.remove(i);
            }
            continue;
        }
        match existing {
            Some(i) => {
                let value = merge_patch(ev, &merged[i].1, &update)?;
                merged[i].1 = value;
            }
            None => {
                let value = merge_patch(ev, &Value::Null, &update)?;
                merged.push((name, value));
            }
        }
    }
    Ok(Value::Object(Rc::new(ObjectValue::from_values(merged))))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::engine::Importer;
    use crate::resolver::{ResolveError, ResolvedImport};

    struct NoImports;

    impl Importer for NoImports {
        fn import(&self, _: &Path, _: &str) -> Result<Option<ResolvedImport>, ResolveError> {
            Ok(None)
        }
    }

    fn eval(src: &str) -> serde_json::Value {
        Evaluator::new(&NoImports).run(None, src).unwrap()
    }

    fn eval_err(src: &str) -> String {
        Evaluator::new(&NoImports).run(None, src).unwrap_err().to_string()
    }

    #[test]
    fn test_std_is_hidden() {
        assert_eq!(eval("{ s: std }"), serde_json::json!({ "s": {} }));
        assert_eq!(eval("std.type(std.length)"), serde_json::json!("function"));
    }

    #[test]
    fn test_types_and_length() {
        assert_eq!(
            eval("[std.length('héllo'), std.length([1, 2]), std.length({ a: 1, b:: 2 }), std.length(function(a, b) a)]"),
            serde_json::json!([5, 2, 1, 2])
        );
        assert_eq!(
            eval("[std.type(null), std.type(1), std.type('s'), std.type({}), std.isArray([]), std.isFunction(std.map)]"),
            serde_json::json!(["null", "number", "string", "object", true, true])
        );
        assert!(eval_err("std.length(1)").contains("std.length: expected string, array, object or function, got number"));
    }

    #[test]
    fn test_object_functions() {
        let src = r#"
            local o = { a: 1, h:: 2 };
            [std.objectFields(o), std.objectFieldsAll(o), std.objectHas(o, 'h'), std.objectHasAll(o, 'h'),
             std.objectValues(o), std.get(o, 'h'), std.get(o, 'h', 0, false), std.get(o, 'z', 'd')]
        "#;
        assert_eq!(
            eval(src),
            serde_json::json!([["a"], ["a", "h"], false, true, [1], 2, 0, "d"])
        );
    }

    #[test]
    fn test_higher_order() {
        assert_eq!(
            eval("std.map(function(x) x * 2, [1, 2, 3])"),
            serde_json::json!([2, 4, 6])
        );
        assert_eq!(
            eval("std.filter(function(x) x % 2 == 1, std.range(1, 6))"),
            serde_json::json!([1, 3, 5])
        );
        assert_eq!(
            eval("[std.foldl(function(a, x) a + x, ['a', 'b'], ''), std.foldr(function(x, a) a + x, ['a', 'b'], '')]"),
            serde_json::json!(["ab", "ba"])
        );
        assert_eq!(
            eval("std.mapWithIndex(function(i, x) i + x, [10, 20])"),
            serde_json::json!([10, 21])
        );
        assert_eq!(
            eval("std.flatMap(function(x) [x, x], [1, 2])"),
            serde_json::json!([1, 1, 2, 2])
        );
        assert_eq!(
            eval("std.makeArray(3, function(i) i * i)"),
            serde_json::json!([0, 1, 4])
        );
        assert!(eval_err("std.map(1, [1])").contains("only functions can be called"));
    }

    #[test]
    fn test_sorting_and_sets() {
        assert_eq!(eval("std.sort([3, 1, 2])"), serde_json::json!([1, 2, 3]));
        assert_eq!(
            eval("std.sort([{ k: 2 }, { k: 1 }], function(o) o.k)"),
            serde_json::json!([{ "k": 1 }, { "k": 2 }])
        );
        assert_eq!(eval("std.uniq([1, 1, 2, 1])"), serde_json::json!([1, 2, 1]));
        assert_eq!(eval("std.set(['b', 'a', 'b'])"), serde_json::json!(["a", "b"]));
        assert!(eval_err("std.sort([1, 'a'])").contains("cannot compare"));
    }

    #[test]
    fn test_array_helpers() {
        assert_eq!(
            eval("[std.join(', ', ['a', null, 'b']), std.join([0], [[1], [2]])]"),
            serde_json::json!(["a, b", [1, 0, 2]])
        );
        assert_eq!(
            eval("[std.member([1, 2], 2), std.contains('abc', 'z'), std.count([1, 2, 1], 1)]"),
            serde_json::json!([true, false, 2])
        );
        assert_eq!(
            eval("[std.reverse([1, 2]), std.flattenArrays([[1], [], [2, 3]])]"),
            serde_json::json!([[2, 1], [1, 2, 3]])
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            eval("[std.split('a,b,,c', ','), std.strReplace('aXbX', 'X', '-'), std.substr('hello', 1, 3)]"),
            serde_json::json!([["a", "b", "", "c"], "a-b-", "ell"])
        );
        assert_eq!(
            eval("[std.startsWith('abc', 'ab'), std.endsWith('abc', 'bc'), std.asciiUpper('aB'), std.trim('  x ')]"),
            serde_json::json!([true, true, "AB", "x"])
        );
        assert_eq!(
            eval("[std.toString([1, 'a', {}]), std.parseInt('-42'), std.char(65), std.codepoint('A')]"),
            serde_json::json!(["[1, \"a\", { }]", -42, "A", 65])
        );
        assert_eq!(eval("std.lines(['a', 'b'])"), serde_json::json!("a\nb\n"));
        assert!(eval_err("std.parseInt('x1')").contains("is not a base 10 integer"));
    }

    #[test]
    fn test_format() {
        assert_eq!(
            eval("std.format('%s=%05.2f|%-3d|%3d|%x|%%', ['pi', 3.14159, 7, 7, 255])"),
            serde_json::json!("pi=03.14|7  |  7|ff|%")
        );
        assert_eq!(eval("'%(a)s/%(b)d' % { a: 'x', b: 2 }"), serde_json::json!("x/2"));
        assert_eq!(eval("'<%s>' % 'one'"), serde_json::json!("<one>"));
        assert!(eval_err("'%s %s' % ['a']").contains("not enough values"));
        assert!(eval_err("'%s' % ['a', 'b']").contains("too many values"));
    }

    #[test]
    fn test_math() {
        assert_eq!(
            eval("[std.abs(-2), std.max(1, 3), std.min(1, 3), std.floor(1.5), std.ceil(1.5), std.pow(2, 10), std.sqrt(9)]"),
            serde_json::json!([2, 3, 1, 1, 2, 1024, 3])
        );
    }

    #[test]
    fn test_json_helpers() {
        assert_eq!(
            eval("std.mergePatch({ a: 1, b: { c: 2, d: 3 } }, { a: null, b: { c: 9 }, e: 4 })"),
            serde_json::json!({ "b": { "c": 9, "d": 3 }, "e": 4 })
        );
        assert_eq!(
            eval("std.manifestJsonEx({ a: [1] }, '  ')"),
            serde_json::json!("{\n  \"a\": [\n    1\n  ]\n}")
        );
        assert_eq!(
            eval("std.parseJson('{\"k\": [true, null]}').k"),
            serde_json::json!([true, null])
        );
        assert_eq!(eval("std.assertEqual(1 + 1, 2)"), serde_json::json!(true));
        assert!(eval_err("std.assertEqual(1, 2)").contains("Assertion failed. 1 != 2"));
        assert!(eval_err("std.extVar('x')").contains("undefined external variable: x"));
    }

    #[test]
    fn test_builtin_argument_errors() {
        assert!(eval_err("std.map(function(x) x)").contains("std.map: missing argument: arr"));
        assert!(eval_err("std.abs(1, 2)").contains("function expected 1 argument(s), got 2"));
        assert_eq!(eval("std.get(o={ a: 1 }, f='a')"), serde_json::json!(1));
    }

    #[test]
    fn test_inline_json() {
        let value = serde_json::json!({ "a": [1, "x"], "b": {}, "c": [] });
        assert_eq!(inline_json(&value), r#"{"a": [1, "x"], "b": { }, "c": [ ]}"#);
    }
}
