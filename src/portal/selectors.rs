//! Selectors and page scripts for the adherent portal.

pub const LOGIN_FORM_URL: &str = "https://adherent.lamutuellegenerale.fr/";

/// Mobile Chrome agent; the login form refuses to render for desktop automation.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 11; Pixel 4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Mobile Safari/537.36";

pub const USERNAME_INPUT: &str = "#username";
pub const PASSWORD_INPUT: &str = "#password";
pub const LOGIN_SUBMIT: &str = "form button[type=\"submit\"]";
pub const LOGIN_ERROR: &str = "span[id*=\"error-element-\"]";
pub const LOGOUT_LINK: &str = "a[analyticsbuttonlabel=\"Déconnexion\"]";
pub const UNSUPPORTED_BROWSER: &str = ".unsupported-browser";

pub const PERSONAL_INFO_LINK: &str = "a[href=\"/mes-informations-personnelles\"]";
pub const PERSONAL_INFO_BANNER: &str = ".personal-information-banner";

pub const REIMBURSEMENTS_LINK: &str = "a[href=\"/mes-remboursements\"]";
pub const MONTH_GROUP: &str = ".remboursements-mois";
pub const MONTH_GROUP_LABEL: &str = ".remboursements-mois h3";
/// Statement download button, within one month-group.
pub const MONTH_PDF_BUTTON: &str = "button.telecharger-releve";
/// Reimbursement detail toggles, within one month-group.
pub const DETAIL_CHEVRON: &str = ".remboursement .chevron";

pub const ATTESTATION_LINK: &str = "a[href=\"/ma-carte-de-tiers-payant\"]";
pub const ATTESTATION_DOWNLOAD: &str = "button.telecharger-attestation";

/// Key under which the submit listener stores the typed credentials.
pub const SUBMITTED_LOGIN_KEY: &str = "__mutuelleLoginSubmit";

/// Records `{login, password}` in sessionStorage when the login form is submitted.
pub const CAPTURE_LOGIN_SCRIPT: &str = r#"
window.addEventListener('DOMContentLoaded', () => {
  const form = document.querySelector('form');
  if (!form) return;
  form.addEventListener('submit', () => {
    const login = document.querySelector('#username')?.value;
    const password = document.querySelector('#password')?.value;
    if (login && password) {
      sessionStorage.setItem('__mutuelleLoginSubmit', JSON.stringify({ login, password }));
    }
  });
});
"#;

/// Returns and removes the captured submission, or `null`.
pub const TAKE_SUBMITTED_LOGIN_SCRIPT: &str = r#"
(() => {
  const raw = sessionStorage.getItem('__mutuelleLoginSubmit');
  sessionStorage.removeItem('__mutuelleLoginSubmit');
  return raw ? JSON.parse(raw) : null;
})()
"#;

/// Returns `[{title, lines}]` for each `.card` on the personal information page.
pub const SCRAPE_CARDS_SCRIPT: &str = r#"
Array.from(document.querySelectorAll('.card')).map(card => ({
  title: card.querySelector('h3')?.textContent?.trim() ?? '',
  lines: Array.from(card.querySelectorAll('div > p')).map(p => p.textContent ?? '')
}))
"#;
