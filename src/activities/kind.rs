//! Closed set of activity type tags.

use serde_json::Value;

/// Every activity type the compiler knows how to validate.
///
/// The wire literal (the activity's `type` field) is case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivityKind {
    Copy,
    TridentNotebook,
    Teams,
    RefreshDataflow,
    GetMetadata,
    Lookup,
    Script,
    SqlServerStoredProcedure,
    SetVariable,
    AppendVariable,
    IfCondition,
    ForEach,
    Switch,
    Filter,
    Wait,
    Until,
    Fail,
    InvokePipeline,
    ExecutePipeline,
    WebActivity,
    WebHook,
    DatabricksNotebook,
    FabricSparkJobDefinition,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 23] = [
        ActivityKind::Copy,
        ActivityKind::TridentNotebook,
        ActivityKind::Teams,
        ActivityKind::RefreshDataflow,
        ActivityKind::GetMetadata,
        ActivityKind::Lookup,
        ActivityKind::Script,
        ActivityKind::SqlServerStoredProcedure,
        ActivityKind::SetVariable,
        ActivityKind::AppendVariable,
        ActivityKind::IfCondition,
        ActivityKind::ForEach,
        ActivityKind::Switch,
        ActivityKind::Filter,
        ActivityKind::Wait,
        ActivityKind::Until,
        ActivityKind::Fail,
        ActivityKind::InvokePipeline,
        ActivityKind::ExecutePipeline,
        ActivityKind::WebActivity,
        ActivityKind::WebHook,
        ActivityKind::DatabricksNotebook,
        ActivityKind::FabricSparkJobDefinition,
    ];

    /// Wire literal used in the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Copy => "Copy",
            ActivityKind::TridentNotebook => "TridentNotebook",
            ActivityKind::Teams => "Teams",
            ActivityKind::RefreshDataflow => "RefreshDataflow",
            ActivityKind::GetMetadata => "GetMetadata",
            ActivityKind::Lookup => "Lookup",
            ActivityKind::Script => "Script",
            ActivityKind::SqlServerStoredProcedure => "SqlServerStoredProcedure",
            ActivityKind::SetVariable => "SetVariable",
            ActivityKind::AppendVariable => "AppendVariable",
            ActivityKind::IfCondition => "IfCondition",
            ActivityKind::ForEach => "ForEach",
            ActivityKind::Switch => "Switch",
            ActivityKind::Filter => "Filter",
            ActivityKind::Wait => "Wait",
            ActivityKind::Until => "Until",
            ActivityKind::Fail => "Fail",
            ActivityKind::InvokePipeline => "InvokePipeline",
            ActivityKind::ExecutePipeline => "ExecutePipeline",
            ActivityKind::WebActivity => "WebActivity",
            ActivityKind::WebHook => "WebHook",
            ActivityKind::DatabricksNotebook => "DatabricksNotebook",
            ActivityKind::FabricSparkJobDefinition => "FabricSparkJobDefinition",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }

    /// Control-flow activities that own nested activity lists.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ActivityKind::ForEach
                | ActivityKind::IfCondition
                | ActivityKind::Until
                | ActivityKind::Switch
        )
    }

    /// JSON pointers (relative to `typeProperties`) of the nested activity
    /// lists actually present in `type_properties`.
    pub fn nested_pointers(&self, type_properties: &Value) -> Vec<String> {
        let candidates: Vec<String> = match self {
            ActivityKind::ForEach | ActivityKind::Until => vec!["/activities".to_string()],
            ActivityKind::IfCondition => vec![
                "/ifTrueActivities".to_string(),
                "/ifFalseActivities".to_string(),
            ],
            ActivityKind::Switch => {
                let case_count = type_properties
                    .get("cases")
                    .and_then(|c| c.as_array())
                    .map(|c| c.len())
                    .unwrap_or(0);
                let mut pointers: Vec<String> = (0..case_count)
                    .map(|i| format!("/cases/{}/activities", i))
                    .collect();
                pointers.push("/defaultActivities".to_string());
                pointers
            }
            _ => Vec::new(),
        };

        candidates
            .into_iter()
            .filter(|p| type_properties.pointer(p).is_some_and(|v| !v.is_null()))
            .collect()
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
