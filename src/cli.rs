//! 命令行前端的输入解析
//!
//! 每行输入：空行忽略；`exit` / `quit`（不区分大小写）结束进程；其余作为一个 turn。

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput {
    Skip,
    Exit,
    Turn(String),
}

pub fn parse_repl_input(line: &str) -> ReplInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        ReplInput::Skip
    } else if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
        ReplInput::Exit
    } else {
        ReplInput::Turn(trimmed.to_string())
    }
}
