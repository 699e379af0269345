//! Request classification and the canonical step templates.
//!
//! Everything matches against the lowercased request. Trigger phrases and
//! keywords are listed in simplified Chinese, traditional Chinese, and
//! English.

use super::step::TaskType;

/// A named step inside a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateStep {
    pub name: &'static str,
    /// Overrides the request-level task type for this step.
    pub task_type: Option<TaskType>,
}

const fn step(name: &'static str, task_type: Option<TaskType>) -> TemplateStep {
    TemplateStep { name, task_type }
}

/// A canonical decomposition for one family of requests.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub name: &'static str,
    pub triggers: &'static [&'static str],
    pub steps: &'static [TemplateStep],
}

use TaskType::*;

/// Templates in match order. The first whose trigger appears wins.
pub const TEMPLATES: &[Template] = &[
    Template {
        name: "full_application",
        triggers: &[
            "创建完整应用",
            "創建完整應用",
            "full application",
            "complete application",
            "full app",
        ],
        steps: &[
            step("requirements analysis", Some(Analysis)),
            step("architecture design", Some(Analysis)),
            step("database design", Some(DatabaseDesign)),
            step("api development", Some(ApiDevelopment)),
            step("frontend development", Some(UiDesign)),
            step("test writing", Some(TestAutomation)),
            step("deployment configuration", Some(Deployment)),
        ],
    },
    Template {
        name: "refactoring",
        triggers: &["代码重构", "代碼重構", "refactor"],
        steps: &[
            step("code analysis", Some(Analysis)),
            step("issue identification", Some(Analysis)),
            step("solution planning", None),
            step("refactoring execution", Some(Refactoring)),
            step("test verification", Some(TestAutomation)),
        ],
    },
    Template {
        name: "ui_design",
        triggers: &["ui设计", "ui設計", "ui design", "界面设计", "界面設計"],
        steps: &[
            step("requirements understanding", Some(Analysis)),
            step("design planning", None),
            step("component generation", Some(UiDesign)),
            step("responsive adaptation", Some(UiDesign)),
            step("test preview", Some(TestAutomation)),
        ],
    },
    Template {
        name: "api_development",
        triggers: &["api开发", "api開發", "api development", "接口开发", "接口開發"],
        steps: &[
            step("interface design", Some(ApiDevelopment)),
            step("code generation", Some(CodeGeneration)),
            step("security check", Some(Analysis)),
            step("documentation generation", None),
            step("test writing", Some(TestAutomation)),
        ],
    },
    Template {
        name: "debugging",
        triggers: &["调试修复", "調試修復", "debug", "bugfix", "fix bug"],
        steps: &[
            step("problem localization", Some(Analysis)),
            step("root cause analysis", Some(Analysis)),
            step("fix planning", None),
            step("code modification", Some(CodeGeneration)),
            step("verification testing", Some(TestAutomation)),
        ],
    },
];

/// Generic four-phase flow used when no template matches: name and
/// description of each phase.
pub const GENERIC_FLOW: &[(&str, &str)] = &[
    ("understand", "analyze and understand the request"),
    ("plan", "plan the implementation approach"),
    ("execute", "carry out the implementation"),
    ("verify", "verify the result"),
];

/// Steps that need the user's input.
pub const USER_INPUT_STEPS: &[&str] = &["requirements analysis", "design planning"];

/// First template whose trigger occurs in `request`.
pub fn match_template(request: &str) -> Option<&'static Template> {
    let request = request.to_lowercase();
    TEMPLATES
        .iter()
        .find(|t| t.triggers.iter().any(|trigger| request.contains(trigger)))
}

/// Heuristic duration of a named step, in seconds.
pub fn estimate_seconds(step_name: &str) -> u64 {
    match step_name {
        "requirements analysis" => 180,
        "architecture design" => 300,
        "code generation" => 600,
        "test writing" => 400,
        "deployment configuration" => 300,
        "code analysis" => 200,
        "problem localization" => 150,
        "fix planning" => 120,
        _ => 300,
    }
}

const GENERATION: &[&str] = &[
    "生成", "创建", "創建", "新建", "开发", "開發", "create", "build", "generate", "develop",
    "implement",
];
const UI: &[&str] = &["ui", "界面", "frontend", "interface"];
const API: &[&str] = &["api", "接口", "endpoint"];
const DATABASE: &[&str] = &["数据库", "數據庫", "database", "schema"];
const REFACTOR: &[&str] = &[
    "重构", "重構", "优化", "優化", "改进", "改進", "refactor", "optimize", "improve",
];
const TEST: &[&str] = &["测试", "測試", "验证", "驗證", "检查", "檢查", "test", "verify", "check"];
const ANALYSIS: &[&str] = &["分析", "审查", "審查", "评估", "評估", "analy", "review", "evaluate"];
const DEPLOY: &[&str] = &["部署", "发布", "發布", "上线", "上線", "deploy", "release", "ship"];

/// ASCII keywords match as word prefixes so that `ui` doesn't fire on
/// "build"; CJK keywords match anywhere.
fn mentions(request: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| {
        if k.is_ascii() {
            request
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word.starts_with(k))
        } else {
            request.contains(k)
        }
    })
}

/// Classify a request. Checks run in a fixed order: generation (refined
/// into UI, API, or database work), refactoring, testing, analysis,
/// deployment; anything else is [`TaskType::Complex`].
pub fn classify(request: &str) -> TaskType {
    let request = request.to_lowercase();
    if mentions(&request, GENERATION) {
        if mentions(&request, UI) {
            UiDesign
        } else if mentions(&request, API) {
            ApiDevelopment
        } else if mentions(&request, DATABASE) {
            DatabaseDesign
        } else {
            CodeGeneration
        }
    } else if mentions(&request, REFACTOR) {
        Refactoring
    } else if mentions(&request, TEST) {
        TestAutomation
    } else if mentions(&request, ANALYSIS) {
        Analysis
    } else if mentions(&request, DEPLOY) {
        Deployment
    } else {
        Complex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_across_languages() {
        assert_eq!(classify("创建完整应用"), CodeGeneration);
        assert_eq!(classify("生成登录界面"), UiDesign);
        assert_eq!(classify("Build a REST API for orders"), ApiDevelopment);
        assert_eq!(classify("build the settings UI"), UiDesign);
        assert_eq!(classify("重構支付模塊"), Refactoring);
        assert_eq!(classify("verify the login flow"), TestAutomation);
        assert_eq!(classify("review this module"), Analysis);
        assert_eq!(classify("部署到生产环境"), Deployment);
        assert_eq!(classify("何かをする"), Complex);
    }

    #[test]
    fn templates_match_in_order() {
        assert_eq!(match_template("创建完整应用").unwrap().steps.len(), 7);
        assert_eq!(match_template("創建完整應用").unwrap().name, "full_application");
        assert_eq!(match_template("Please REFACTOR the parser").unwrap().name, "refactoring");
        assert_eq!(match_template("UI Design for settings").unwrap().name, "ui_design");
        assert!(match_template("write a haiku").is_none());
    }

    #[test]
    fn step_time_table() {
        assert_eq!(estimate_seconds("code generation"), 600);
        assert_eq!(estimate_seconds("frontend development"), 300);
    }
}
