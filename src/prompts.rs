//! Prompt texts.
//!
//! Answers are written for a Korean-speaking CRM team, so the user-facing
//! markers and few-shot examples are Korean.

use crate::models::TemplateRequest;

/// Returned by `pdf_search` when neither index has any hits.
pub const NO_DOCUMENTS_FOUND: &str = "관련 문서를 찾을 수 없습니다.";

/// The answer the synthesizer must give when the context is insufficient.
pub const INSUFFICIENT_CONTEXT: &str = "문서에서 답을 찾을 수 없습니다.";

/// Returned by `web_search` when the provider has no results.
pub const NO_WEB_RESULT: &str = "No web result.";

pub const AGENT_SYSTEM: &str = "당신은 CRM 전문가이자 UX 리서처입니다. \
고객 퍼널별 UX 인사이트, CRM 메시지 템플릿과 관련된 질문은 pdf_search 도구를 우선 사용하고, \
최신 일반 정보가 필요하면 web_search 도구를 사용하세요.";

const SYNTHESIS_EXAMPLES: &str = "# Examples
Example 1
Context:
- 장바구니 이탈율이 62%로 높음
- 모바일에서 결제 페이지 로딩이 3.2s → 전환율 저하
Question: 장바구니 이탈을 낮추려면?
Answer (Korean):
• 로딩 원인(이미지/스크립트)을 줄이고 결제 페이지 TTFB 목표 1s 이하로 개선
• 장바구니 보존 기간을 7일로 늘리고, 이어하기 CTA를 상단 고정
• 실패한 결제 재시도 유도 배너 및 고객센터 진입 동선 추가

Example 2
Context:
- 신규 유입은 많으나 온보딩 튜토리얼 이탈률 45%
- 튜토리얼 길이 12단계, 핵심 가치 제시가 늦음
Question: 온보딩 완주율을 올리려면?
Answer (Korean):
• 3~5단계로 축소하고 첫 10초 내 핵심 가치(혜택)를 먼저 제시
• 단계별 진행률/보상 표시, 건너뛰기 후 재진입 경로 제공
• 마이크로 카피로 사용자의 다음 행동을 구체적으로 안내
";

pub fn synthesis_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a senior UX researcher. Use ONLY the context.\n\n\
         {SYNTHESIS_EXAMPLES}\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\
         Answer in Korean as 3-5 concise bullet points using only facts from Context. \
         If information is missing, reply: '{INSUFFICIENT_CONTEXT}'"
    )
}

const ISSUE_EXAMPLES: &str = r#"# Examples (follow this structure strictly)
Example 1
Answer (context):
- 회원가입 중 로딩 지연으로 이탈 발생
- 입력 값이 저장되지 않아 사용자 불만 증가
- 고객센터 연결 동선이 없음
Output JSON:
{
  "title": "회원가입 중 로딩 지연으로 이탈 증가",
  "severity": "High",
  "tasks": {
    "Dev": ["입력값 자동 임시저장 기능 구현", "TTFB 1s 이하로 성능 최적화", "오류 로그 수집/알림 설정"],
    "PM": ["이탈 구간/원인 데이터 분석", "임시저장/복원 정책 수립", "고객센터 연동 우선순위 조정"],
    "Design": ["에러/지연 안내 UX 개선", "이어하기 CTA 고정", "고객센터 진입 버튼 추가"]
  }
}

Example 2
Answer (context):
- 장바구니 방치 48시간 이후 재방문율 낮음
- 푸시/이메일 리마인드 없음
- 배송비에 대한 불확실성 존재
Output JSON:
{
  "title": "장바구니 방치로 전환 저하",
  "severity": "Medium",
  "tasks": {
    "Dev": ["장바구니 보존 기간 7일 설정", "쿠폰 적용 미리보기 구현", "배송비 계산 API 노출"],
    "PM": ["방치 24/48h 리마인드 시나리오 설계", "전환률/오픈률 AB 테스트 기획", "비용-효과 분석"],
    "Design": ["리마인드 메시지 톤앤매너 정의", "장바구니 이어하기 버튼 강조", "배송비 안내 모듈 시각화"]
  }
}
"#;

pub fn issue_prompt(answer: &str) -> String {
    format!(
        "You are a product owner who converts UX insight into a triage-ready issue.\n\
         Return ONLY valid JSON (UTF-8, double quotes). No extra text before/after JSON.\n\
         Each output must be an object with keys: \"title\" (string), \"severity\" (one of High/Medium/Low), \
         \"tasks\" (object with keys Dev, PM, Design; each an array of 3 concise items).\n\
         Return a JSON object.\n\n\
         {ISSUE_EXAMPLES}\n\
         Answer (context):\n{answer}\n\n\
         Output JSON:\n"
    )
}

pub fn template_prompt(req: &TemplateRequest) -> String {
    format!(
        "You are a senior Korean CRM copywriter.\n\
         Business: {}\n\
         Funnel: {}\n\
         Tone: {}\n\
         Insight: {}\n\n\
         Return 3 messages (<80 chars, Korean) with rationale.\n\
         JSON ONLY: [{{\"copy\":\"...\", \"rationale\":\"...\"}}]\n",
        req.business_desc, req.funnel_stage, req.tone, req.insight
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_prompt_embeds_inputs() {
        let p = synthesis_prompt("이탈율 62%", "왜 이탈하나?");
        assert!(p.contains("Context:\n이탈율 62%"));
        assert!(p.contains("Question: 왜 이탈하나?"));
        assert!(p.ends_with(&format!("'{}'", INSUFFICIENT_CONTEXT)));
    }

    #[test]
    fn test_issue_prompt_ends_with_answer_slot() {
        let p = issue_prompt("- 로딩 3.2s");
        assert!(p.contains("Answer (context):\n- 로딩 3.2s"));
        assert!(p.trim_end().ends_with("Output JSON:"));
    }

    #[test]
    fn test_template_prompt_braces_render() {
        let p = template_prompt(&TemplateRequest {
            business_desc: "커머스".into(),
            funnel_stage: "retention".into(),
            tone: "friendly".into(),
            insight: "재방문 낮음".into(),
        });
        assert!(p.contains(r#"[{"copy":"...", "rationale":"..."}]"#));
        assert!(p.contains("Funnel: retention"));
    }
}
