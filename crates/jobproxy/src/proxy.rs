//! # Invocation Proxies
//!
//! Callable stand-ins for functions that live in a worker.
//!
//! A [`ProxyFunction`] targets either the worker's default function or one
//! named method. A [`ProxyModule`] is a set of proxy functions, one per method
//! name, all sharing the same link and uid space.

use std::collections::BTreeMap;

use jobwire::Arg;

use crate::error::Error;
use crate::error::Result;
use crate::link::Link;
use crate::promise::ObservablePromise;

/// A function that runs in the worker.
#[derive(Clone, Debug)]
pub struct ProxyFunction {
    link: Link,
    method: Option<String>,
}

impl ProxyFunction {
    pub fn new(link: &Link, method: Option<&str>) -> Self {
        Self {
            link: link.clone(),
            method: method.map(str::to_string),
        }
    }

    /// The targeted method, or `None` for the default function.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Calls the function.
    ///
    /// Returns as soon as the run message is sent. Fails right away if the
    /// channel cannot take the message.
    pub fn call<I>(&self, args: I) -> Result<ObservablePromise>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.link.invoke(self.method.as_deref(), args.into_iter().map(Into::into))
    }
}

/// A worker module, exposed as a table of proxy functions.
#[derive(Clone, Debug)]
pub struct ProxyModule {
    functions: BTreeMap<String, ProxyFunction>,
}

impl ProxyModule {
    pub fn new<I, S>(link: &Link, method_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let functions = method_names
            .into_iter()
            .map(|name| {
                let name: String = name.into();
                let function = ProxyFunction::new(link, Some(name.as_str()));
                (name, function)
            })
            .collect();

        Self { functions }
    }

    pub fn get(&self, method: &str) -> Option<&ProxyFunction> {
        self.functions.get(method)
    }

    /// Calls a method by name.
    pub fn call<I>(&self, method: &str, args: I) -> Result<ObservablePromise>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        let function = self
            .get(method)
            .ok_or_else(|| Error::MethodNotExposed(method.to_string()))?;
        function.call(args)
    }

    /// Exposed method names, sorted.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}
