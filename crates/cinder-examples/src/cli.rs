//! 两个示例二进制共用的命令行解析。
//!
//! 支持 `--flag value` 与 `--flag=value` 两种写法，单横线亦可；
//! 布尔开关单独出现时视为 `true`。

use std::path::PathBuf;

use crate::settings::Settings;

pub const USAGE: &str = "\
usage: <server> [--config settings.toml] [--port N] [--multicore[=true|false]] \
[--plaintext] [--self-test[=true|false]]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerArgs {
    pub config: Option<PathBuf>,
    pub port: Option<u16>,
    /// 未给出时沿用配置文件中的分片数。
    pub multicore: Option<bool>,
    pub plaintext: bool,
    /// 仅回显服务器使用：启动后连接自身并周期性发送 `HelloWorld` 帧。
    pub self_test: bool,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            config: None,
            port: None,
            multicore: None,
            plaintext: false,
            self_test: true,
        }
    }
}

impl ServerArgs {
    pub fn parse<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let trimmed = arg.trim_start_matches('-');
            if trimmed.len() == arg.len() {
                return Err(format!("unexpected argument: {arg}"));
            }
            let (flag, inline) = match trimmed.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_owned())),
                None => (trimmed, None),
            };
            match flag {
                "config" => {
                    let value = inline
                        .or_else(|| args.next())
                        .ok_or("--config requires a path")?;
                    parsed.config = Some(PathBuf::from(value));
                }
                "port" => {
                    let value = inline
                        .or_else(|| args.next())
                        .ok_or("--port requires a number")?;
                    let port = value
                        .parse()
                        .map_err(|_| format!("invalid port: {value}"))?;
                    parsed.port = Some(port);
                }
                "multicore" => parsed.multicore = Some(switch(flag, inline)?),
                "plaintext" => parsed.plaintext = switch(flag, inline)?,
                "self-test" => parsed.self_test = switch(flag, inline)?,
                // `cargo bench -- --quick` 之类的透传参数
                "quick" => {}
                unknown => return Err(format!("unknown flag: --{unknown}")),
            }
        }
        Ok(parsed)
    }

    /// 以命令行覆盖配置文件中的对应项。
    pub fn apply(&self, settings: Settings) -> Settings {
        let mut settings = match self.port {
            Some(port) => settings.with_port(port),
            None => settings,
        };
        if let Some(multicore) = self.multicore {
            settings.engine = settings.engine.multicore(multicore);
        }
        if self.plaintext {
            settings.tls = None;
        }
        settings
    }
}

fn switch(flag: &str, value: Option<String>) -> Result<bool, String> {
    match value.as_deref() {
        None | Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(format!("--{flag} expects true or false, got {other}")),
    }
}
