//! Recording fake interpreter shared by integration tests

#![allow(dead_code)]

use ember_core::ScriptValue;
use ember_scripting::{
    FormTarget, Interpreter, OutputSink, RequestInfo, Result, ScriptError, StartupOptions,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One thing the fake script does when executed
#[derive(Debug, Clone)]
pub enum Action {
    Output(Vec<u8>),
    Header(String),
    Stdout(Vec<u8>),
    /// Write `symbol[key]`, or `-` when absent
    EchoSymbol(&'static str, &'static str),
    Fail(&'static str),
}

pub fn output(text: &str) -> Action {
    Action::Output(text.as_bytes().to_vec())
}

pub fn header(line: &str) -> Action {
    Action::Header(line.to_string())
}

/// Everything observed by the fake, shared with the test
#[derive(Debug, Default)]
pub struct Log {
    pub startups: usize,
    pub shutdowns: usize,
    pub request_startups: usize,
    pub request_shutdowns: usize,
    pub startup_options: Vec<StartupOptions>,
    pub declared: Vec<RequestInfo>,
    pub executed: Vec<PathBuf>,
    pub forms: Vec<(FormTarget, Vec<u8>)>,
    pub bodies: Vec<Vec<u8>>,
    pub routed: bool,
}

#[derive(Debug, Default)]
pub struct FakeInterpreter {
    pub log: Arc<Mutex<Log>>,
    pub script: Vec<Action>,
    pub fail_startup: bool,
    pub fail_request_startup: bool,
    started: bool,
    active: bool,
    symbols: BTreeMap<String, ScriptValue>,
    exit_status: i32,
}

impl FakeInterpreter {
    pub fn new(script: Vec<Action>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn log(&self) -> Arc<Mutex<Log>> {
        Arc::clone(&self.log)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

impl Interpreter for FakeInterpreter {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn startup(&mut self, options: &StartupOptions) -> Result<()> {
        let mut log = self.log.lock();
        log.startup_options.push(options.clone());
        if self.fail_startup {
            return Err(ScriptError::startup("refused"));
        }
        log.startups += 1;
        self.started = true;
        Ok(())
    }

    fn declare_request(&mut self, info: &RequestInfo) {
        self.log.lock().declared.push(info.clone());
    }

    fn request_startup(&mut self) -> Result<()> {
        if !self.started {
            return Err(ScriptError::NotStarted);
        }
        if self.fail_request_startup {
            return Err(ScriptError::startup("request refused"));
        }
        self.log.lock().request_startups += 1;
        self.active = true;
        Ok(())
    }

    fn request_active(&self) -> bool {
        self.active
    }

    fn set_symbol(&mut self, name: &str, value: ScriptValue) {
        self.symbols.insert(name.to_string(), value);
    }

    fn parse_form_data(&mut self, target: FormTarget, data: &[u8]) {
        self.log.lock().forms.push((target, data.to_vec()));
    }

    fn attach_request_body(&mut self, body: &[u8]) {
        self.log.lock().bodies.push(body.to_vec());
    }

    fn expose_stdout(&mut self) {}

    fn route_stdio_to_output(&mut self) -> Result<()> {
        self.log.lock().routed = true;
        Ok(())
    }

    fn finish_request_startup(&mut self) {
        self.exit_status = 0;
    }

    fn execute(&mut self, script: &Path, sink: &mut dyn OutputSink) -> Result<()> {
        if !self.started {
            return Err(ScriptError::NotStarted);
        }
        self.log.lock().executed.push(script.to_path_buf());

        for action in &self.script {
            match action {
                Action::Output(bytes) => sink.write(bytes),
                Action::Header(line) => sink.header(line),
                Action::Stdout(bytes) => sink.write_stdout(bytes),
                Action::EchoSymbol(symbol, key) => {
                    let value = self
                        .symbols
                        .get(*symbol)
                        .and_then(|map| map.get(key))
                        .and_then(ScriptValue::as_str)
                        .unwrap_or("-");
                    sink.write(value.as_bytes());
                }
                Action::Fail(message) => {
                    self.exit_status = 255;
                    return Err(ScriptError::runtime(*message));
                }
            }
        }
        Ok(())
    }

    fn exit_status(&self) -> i32 {
        self.exit_status
    }

    fn request_shutdown(&mut self) {
        self.log.lock().request_shutdowns += 1;
        self.active = false;
        self.symbols.clear();
    }

    fn shutdown(&mut self) {
        self.log.lock().shutdowns += 1;
        self.started = false;
        self.active = false;
        self.symbols.clear();
    }
}
