#[cfg(feature = "console_error_panic_hook")]
pub fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
pub fn set_panic_hook() {}

/// 将 `log` 输出接到浏览器控制台。重复调用时保留第一次安装的 logger。
#[cfg(feature = "browser_log")]
pub fn init_logging(level: log::Level) {
    let _ = console_log::init_with_level(level);
}

#[cfg(not(feature = "browser_log"))]
pub fn init_logging(_level: log::Level) {}
