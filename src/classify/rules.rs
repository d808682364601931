//! Keyword and punctuation heuristics for extreme negativity

use tracing::debug;

const INSULT_TERMS: &[&str] = &[
    "垃圾", "傻逼", "坑爹", "骗子", "黑心", "恶心", "坑人", "草", "妈的", "狗屎", "操", "卧槽",
    "尼玛", "滚", "死", "脑残", "白痴", "弱智", "蠢货", "废物", "渣渣", "智障", "二逼", "煞笔",
    "傻叉", "贱", "低级", "恶劣", "下流", "无耻", "可耻", "丢人", "糟糕", "破烂", "混蛋", "王八蛋",
    "狗东西", "畜生", "禽兽", "人渣", "败类", "神经病", "有病", "缺德", "恶毒", "阴险", "卑鄙",
    "龌龊", "shit", "fuck", "damn", "stupid", "idiot", "garbage", "trash", "scam", "asshole",
    "bitch", "bastard", "crap", "suck", "moron", "jerk", "loser", "pathetic", "disgusting",
    "awful", "terrible", "horrible", "worthless", "useless", "ridiculous", "absurd", "nonsense",
    "bullshit", "dumb", "retarded", "crazy", "insane", "sick", "twisted", "evil",
];

const THREAT_TERMS: &[&str] = &[
    "投诉", "曝光", "举报", "起诉", "报警", "媒体", "监管", "工商", "法院", "告发", "检举", "揭发",
    "揭露", "告状", "上诉", "申诉", "控告", "律师", "法律", "诉讼", "赔偿", "维权", "打官司", "法庭",
    "仲裁", "消费者协会", "消协", "12315", "记者", "新闻", "电视台", "报社", "网络", "微博",
    "朋友圈", "公开", "公布", "传播", "扩散", "转发", "封杀", "抵制", "黑名单", "拉黑", "删除",
    "屏蔽", "查封", "关闭", "威胁", "恐吓", "警告", "后果", "严重", "负责", "追究", "惩罚", "sue",
    "lawsuit", "report", "expose", "media", "police", "court", "lawyer", "legal", "prosecution",
    "complain", "complaint", "authority", "government", "department", "agency", "investigation",
    "publish", "broadcast", "journalist", "reporter", "news", "press", "social media",
    "facebook", "twitter", "instagram", "youtube", "boycott", "blacklist", "ban", "block",
    "delete", "remove", "shut down", "threaten", "warning", "consequence", "serious",
    "responsible", "punishment",
];

const EXTREME_EMOTION_TERMS: &[&str] = &[
    "恶劣", "恶心", "愤怒", "气死", "崩溃", "绝望", "愤慨", "痛恨", "厌恶", "暴怒", "狂怒", "发疯",
    "抓狂", "疯狂", "失望", "沮丧", "难过", "心碎", "痛苦", "煎熬", "折磨", "受罪", "悲惨", "凄惨",
    "惨不忍睹", "无语", "speechless", "震惊", "惊讶", "不敢相信", "无法接受", "后悔", "遗憾",
    "可惜", "白费", "浪费", "亏", "损失", "倒霉", "糟糕", "糟透", "完蛋", "毁了", "砸了", "废了",
    "完了", "死定了", "受够了", "忍无可忍", "极限", "爆发", "彻底", "完全", "彻底失望", "心寒",
    "心凉", "寒心", "心死", "死心", "放弃", "算了", "不要了", "terrible", "horrible", "awful",
    "disgusting", "furious", "hate", "despise", "outrageous", "unacceptable", "intolerable",
    "unbearable", "devastating", "shocking", "appalling", "revolting", "sickening", "frustrated",
    "annoyed", "irritated", "pissed", "mad", "angry", "rage", "disappointed", "heartbroken",
    "devastated", "crushed", "destroyed", "hopeless", "desperate", "miserable", "suffering",
    "painful", "agony", "nightmare", "disaster", "catastrophe", "failure", "ruined", "wasted",
    "regret", "sorry", "unfortunate", "unlucky", "bad luck", "curse", "enough", "fed up",
    "sick of", "tired of", "done with", "give up", "junk",
];

const SERVICE_COMPLAINT_TERMS: &[&str] = &[
    "服务差", "态度差", "不耐烦", "不礼貌", "粗鲁", "傲慢", "冷淡", "不专业", "不负责", "敷衍",
    "推脱", "踢皮球", "拖延", "效率低", "回复慢", "不回复", "联系不上", "找不到人", "客服差",
    "售后差", "不解决问题", "解决不了", "处理不当", "态度恶劣", "欺骗客户", "虚假承诺",
    "说一套做一套", "言而无信", "不守信用", "骗钱", "poor service", "bad service",
    "terrible service", "rude", "unprofessional", "unhelpful", "slow response", "no response",
    "ignore", "dismissive", "arrogant", "condescending", "incompetent", "irresponsible",
    "unreliable", "misleading", "deceptive", "dishonest", "fraudulent", "scam", "cheat",
];

const PUNCTUATION_WEIGHT: f64 = 0.1;
const INSULT_WEIGHT: f64 = 0.3;
const THREAT_WEIGHT: f64 = 0.3;
const EXTREME_EMOTION_WEIGHT: f64 = 0.3;
const SERVICE_COMPLAINT_WEIGHT: f64 = 0.2;

fn first_match(haystack: &str, terms: &'static [&'static str]) -> Option<&'static str> {
    terms.iter().copied().find(|term| haystack.contains(term))
}

/// Rule-based extremeness score in `[0, 1]`.
///
/// Each category contributes its weight at most once: two or more `!`/`?`
/// marks (ASCII or full-width) 0.1, insults 0.3, threats 0.3, extreme
/// emotion 0.3, service complaints 0.2. Matching is case-insensitive
/// substring search.
pub fn rule_score(text: &str) -> f64 {
    let lowered = text.to_lowercase();
    let mut score = 0.0;

    let marks = lowered
        .chars()
        .filter(|c| matches!(c, '!' | '?' | '！' | '？'))
        .count();
    if marks >= 2 {
        score += PUNCTUATION_WEIGHT;
    }

    for (category, terms, weight) in [
        ("insult", INSULT_TERMS, INSULT_WEIGHT),
        ("threat", THREAT_TERMS, THREAT_WEIGHT),
        ("extreme_emotion", EXTREME_EMOTION_TERMS, EXTREME_EMOTION_WEIGHT),
        ("service_complaint", SERVICE_COMPLAINT_TERMS, SERVICE_COMPLAINT_WEIGHT),
    ] {
        if let Some(term) = first_match(&lowered, terms) {
            debug!(category, term, "Rule match");
            score += weight;
        }
    }

    score.min(1.0)
}

/// Outcome of the secondary check for one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtremeVerdict {
    pub rule_score: f64,
    pub api_score: Option<f64>,
    pub final_score: f64,
    pub extreme: bool,
}

/// Whether the rule score is high enough to spend a classifier call on
pub fn needs_deep_check(rule_score: f64, threshold: f64) -> bool {
    rule_score > threshold
}

/// Blend the rule score with an optional classifier score and apply the cutoff
pub fn verdict(rule_score: f64, api_score: Option<f64>, cutoff: f64) -> ExtremeVerdict {
    let final_score = match api_score {
        Some(api) => (rule_score + api.clamp(0.0, 1.0)) / 2.0,
        None => rule_score,
    };
    ExtremeVerdict {
        rule_score,
        api_score,
        final_score,
        extreme: final_score >= cutoff,
    }
}
